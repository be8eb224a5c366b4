use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level message kinds of the upstream protocol.
///
/// Only `Record` and `State` are accepted by the pipeline; the rest are
/// recognised so they can be rejected with a precise error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Record,
    State,
    Log,
    Trace,
    Control,
    Spec,
    Catalog,
    ConnectionStatus,
}

impl MessageKind {
    /// Returns the wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Record => "RECORD",
            MessageKind::State => "STATE",
            MessageKind::Log => "LOG",
            MessageKind::Trace => "TRACE",
            MessageKind::Control => "CONTROL",
            MessageKind::Spec => "SPEC",
            MessageKind::Catalog => "CATALOG",
            MessageKind::ConnectionStatus => "CONNECTION_STATUS",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a logical stream multiplexed through the pipeline.
///
/// Field order matters: the derived `Ord` compares by name first, then
/// namespace, which is the tie-break order used by the flush scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    /// Stream name (e.g. `"users"`).
    pub name: String,
    /// Optional namespace (e.g. `"public"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// A stream without a namespace.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Fill in `namespace` when the stream carries none.
    pub fn with_default_namespace(mut self, namespace: Option<&str>) -> Self {
        if self.namespace.is_none() {
            self.namespace = namespace.map(str::to_string);
        }
        self
    }

    /// Returns `namespace.name`, or just `name` without a namespace.
    pub fn qualified(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}.{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Which records a checkpoint vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CheckpointScope {
    /// Records of a single stream.
    Stream(StreamId),
    /// Records of every stream (global and legacy state).
    Global,
}

impl CheckpointScope {
    pub fn is_global(&self) -> bool {
        matches!(self, CheckpointScope::Global)
    }
}

impl fmt::Display for CheckpointScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointScope::Stream(id) => write!(f, "stream:{}", id),
            CheckpointScope::Global => f.write_str("global"),
        }
    }
}
