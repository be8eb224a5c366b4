pub mod registry;

pub use registry::PipelineMetrics;
