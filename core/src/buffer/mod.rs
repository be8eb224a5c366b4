pub mod batch;
pub mod store;

pub use batch::{BufferedRecord, DequeuedBatch};
pub use store::{BufferView, StreamBufferStore};
