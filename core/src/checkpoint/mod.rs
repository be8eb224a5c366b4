pub mod manager;

pub use manager::{CheckpointId, CheckpointManager, CheckpointMode};
