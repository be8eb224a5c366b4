pub mod builder;
pub mod failure;
pub mod ingestion;
mod worker;

pub use builder::PipelineBuilder;
pub use failure::FlushFailure;
pub use ingestion::IngestionPipeline;
