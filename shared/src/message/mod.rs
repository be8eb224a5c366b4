pub mod envelope;
pub mod types;

pub use envelope::{
    deserialize_message, CheckpointMessage, EmittedCheckpoint, Message, RecordMessage,
};
pub use types::{CheckpointScope, MessageKind, StreamId};
