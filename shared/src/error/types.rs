use std::sync::Arc;

use thiserror::Error;

/// Top-level error type for Tidewater.
///
/// Each variant corresponds to a subsystem boundary. Destination errors
/// are attached as `#[source]` so that `anyhow` chains preserve the full
/// cause.
#[derive(Debug, Error)]
pub enum TidewaterError {
    // ── Ingestion ──────────────────────────────────────────────
    #[error("ingestion: malformed message payload")]
    MalformedMessage(#[source] serde_json::Error),

    #[error("ingestion: unsupported message type '{0}'")]
    UnsupportedMessage(String),

    #[error("ingestion: {kind} message has no '{field}' body")]
    MissingMessageBody {
        kind: &'static str,
        field: &'static str,
    },

    #[error("ingestion: record of {size_bytes} bytes can never fit in a stream reservation of at most {capacity_bytes} bytes")]
    RecordTooLarge { size_bytes: u64, capacity_bytes: u64 },

    // ── Checkpoint ─────────────────────────────────────────────
    #[error("checkpoint: received a {actual} checkpoint after {expected} checkpoints were tracked")]
    CheckpointModeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    // ── Flush ──────────────────────────────────────────────────
    #[error("flush: destination flush failed for stream '{stream}'")]
    FlushFailed {
        stream: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("flush: cannot complete flush worker {worker} for stream '{stream}' that has not started")]
    FlushWorkerNotStarted { stream: String, worker: u64 },

    #[error("flush: cannot register batch size for flush worker {worker} of stream '{stream}' that is not tracked")]
    FlushWorkerNotTracked { stream: String, worker: u64 },

    // ── Destination ────────────────────────────────────────────
    #[error("destination: {hook} hook failed")]
    DestinationHook {
        hook: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ── Lifecycle ──────────────────────────────────────────────
    #[error("pipeline: not started")]
    NotStarted,

    #[error("pipeline: already started")]
    AlreadyStarted,

    #[error("pipeline: closed")]
    Closed,

    // ── Config ─────────────────────────────────────────────────
    #[error("config: failed to load configuration")]
    ConfigLoadFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("config: invalid value for '{key}': {reason}")]
    ConfigInvalid { key: String, reason: String },

    // ── Generic ────────────────────────────────────────────────
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
