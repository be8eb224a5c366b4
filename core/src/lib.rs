//! Adaptive flush scheduling and backpressure-aware ingestion.
//!
//! Records are buffered per stream under a shared [`memory::MemoryBudget`];
//! a [`flush::FlushScheduler`] picks which stream to hand to the
//! [`destination::Destination`] next, and checkpoints are re-emitted only
//! once every record counted against them has been flushed.

pub mod buffer;
pub mod checkpoint;
pub mod clock;
pub mod daemon;
pub mod destination;
pub mod flush;
pub mod memory;
pub mod metrics;
pub mod pipeline;

pub use destination::{BatchResult, Destination, OutputCollector, StreamSyncSummary};
pub use pipeline::{IngestionPipeline, PipelineBuilder};
