use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{CheckpointScope, MessageKind, StreamId};
use crate::error::TidewaterError;

/// A decoded upstream message: either a record or a checkpoint.
///
/// Only the fields the pipeline needs are decoded. Record data is kept as
/// its serialized JSON bytes; checkpoints keep the whole original message
/// so it can be re-emitted unchanged apart from the destination stats.
#[derive(Debug, Clone)]
pub enum Message {
    Record(RecordMessage),
    Checkpoint(CheckpointMessage),
}

/// A single record destined for one stream.
#[derive(Debug, Clone)]
pub struct RecordMessage {
    pub stream: StreamId,
    /// Serialized `data` object.
    pub data: Bytes,
    /// Source-side emission time (milliseconds since Unix epoch).
    pub emitted_at_ms: Option<i64>,
}

/// A checkpoint (state) marker received from the source.
#[derive(Debug, Clone)]
pub struct CheckpointMessage {
    scope: CheckpointScope,
    original: Value,
}

/// A checkpoint whose records were all flushed, ready to be emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedCheckpoint {
    pub scope: CheckpointScope,
    /// Records flushed for this checkpoint since the previous one.
    pub record_count: u64,
    /// The original message with `state.destination_stats` attached.
    pub message: Value,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(default)]
    record: Option<WireRecord>,
    #[serde(default)]
    state: Option<WireState>,
}

#[derive(Deserialize)]
struct WireRecord {
    #[serde(default)]
    namespace: Option<String>,
    stream: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    emitted_at: Option<i64>,
}

#[derive(Deserialize)]
struct WireState {
    #[serde(rename = "type", default)]
    kind: Option<StateKind>,
    #[serde(default)]
    stream: Option<WireStreamState>,
}

#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum StateKind {
    Stream,
    Global,
    Legacy,
}

#[derive(Deserialize)]
struct WireStreamState {
    stream_descriptor: StreamId,
}

/// Decode one serialized message.
///
/// `default_namespace` is applied to records and stream checkpoints that do
/// not name a namespace. Any message type other than `RECORD` or `STATE`,
/// and any message missing its body, is rejected.
pub fn deserialize_message(
    raw: &str,
    default_namespace: Option<&str>,
) -> Result<Message, TidewaterError> {
    let wire: WireMessage = serde_json::from_str(raw).map_err(TidewaterError::MalformedMessage)?;

    match wire.kind {
        MessageKind::Record => {
            let record = wire.record.ok_or(TidewaterError::MissingMessageBody {
                kind: "RECORD",
                field: "record",
            })?;
            let data = serde_json::to_vec(&record.data).map_err(TidewaterError::MalformedMessage)?;
            let stream = StreamId {
                name: record.stream,
                namespace: record.namespace,
            }
            .with_default_namespace(default_namespace);

            Ok(Message::Record(RecordMessage {
                stream,
                data: Bytes::from(data),
                emitted_at_ms: record.emitted_at,
            }))
        }
        MessageKind::State => {
            let state = wire.state.ok_or(TidewaterError::MissingMessageBody {
                kind: "STATE",
                field: "state",
            })?;
            let scope = match state.kind {
                Some(StateKind::Stream) => {
                    let stream = state.stream.ok_or(TidewaterError::MissingMessageBody {
                        kind: "STREAM state",
                        field: "stream",
                    })?;
                    CheckpointScope::Stream(
                        stream
                            .stream_descriptor
                            .with_default_namespace(default_namespace),
                    )
                }
                // Untyped state is the legacy format, which covers every stream.
                Some(StateKind::Global) | Some(StateKind::Legacy) | None => CheckpointScope::Global,
            };
            let original: Value =
                serde_json::from_str(raw).map_err(TidewaterError::MalformedMessage)?;

            Ok(Message::Checkpoint(CheckpointMessage { scope, original }))
        }
        other => Err(TidewaterError::UnsupportedMessage(other.to_string())),
    }
}

impl RecordMessage {
    /// Length of the serialized data.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }
}

impl CheckpointMessage {
    pub fn new(scope: CheckpointScope, original: Value) -> Self {
        Self { scope, original }
    }

    pub fn scope(&self) -> &CheckpointScope {
        &self.scope
    }

    pub fn original(&self) -> &Value {
        &self.original
    }

    /// Attach destination stats and turn this into an emittable checkpoint.
    pub fn into_emitted(self, record_count: u64) -> EmittedCheckpoint {
        let mut message = self.original;
        if let Some(state) = message.get_mut("state").and_then(Value::as_object_mut) {
            state.insert(
                "destination_stats".to_string(),
                json!({ "record_count": record_count }),
            );
        }
        EmittedCheckpoint {
            scope: self.scope,
            record_count,
            message,
        }
    }
}

impl EmittedCheckpoint {
    /// Serialize for the output channel.
    pub fn to_json_string(&self) -> String {
        self.message.to_string()
    }
}
