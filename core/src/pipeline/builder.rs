use shared::config::TidewaterConfig;
use shared::error::{Result, TidewaterError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::failure::FlushFailure;
use super::ingestion::{IngestionPipeline, PipelineInner};
use crate::buffer::StreamBufferStore;
use crate::checkpoint::CheckpointManager;
use crate::clock::{Clock, SystemClock};
use crate::daemon::lifecycle::Lifecycle;
use crate::destination::{Destination, OutputCollector};
use crate::flush::{FlushScheduler, FlushThresholdPolicy, FlushWorkerRegistry};
use crate::memory::MemoryBudget;
use crate::metrics::PipelineMetrics;

/// Builder for configuring an `IngestionPipeline`.
pub struct PipelineBuilder {
  destination: Arc<dyn Destination>,
  output: Arc<dyn OutputCollector>,
  config: TidewaterConfig,
  clock: Arc<dyn Clock>,
  metrics: Option<Arc<PipelineMetrics>>,
}

impl PipelineBuilder {
  pub fn new(destination: Arc<dyn Destination>, output: Arc<dyn OutputCollector>) -> Self {
    Self {
      destination,
      output,
      config: TidewaterConfig::default(),
      clock: Arc::new(SystemClock),
      metrics: None,
    }
  }

  /// Use the given configuration instead of the defaults.
  pub fn config(mut self, config: TidewaterConfig) -> Self {
    self.config = config;
    self
  }

  /// Set the time source for record timestamps and time-based flushes.
  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Share an existing metrics registry.
  pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Validate the configuration and assemble the pipeline.
  pub fn build(self) -> Result<IngestionPipeline> {
    self.config.validate()?;

    let metrics = match self.metrics {
      Some(metrics) => metrics,
      None => Arc::new(PipelineMetrics::new().map_err(TidewaterError::Internal)?),
    };

    let budget = MemoryBudget::from_config(&self.config.memory);
    metrics.memory_capacity.set(budget.capacity() as i64);

    let policy = FlushThresholdPolicy::from_config(&self.config);
    let buffers = Arc::new(StreamBufferStore::new(
      policy.max_global_queue_size_bytes,
      Arc::clone(&self.clock),
    ));
    let workers = Arc::new(FlushWorkerRegistry::new());
    let scheduler = FlushScheduler::new(
      buffers.clone(),
      workers.clone(),
      policy,
      Arc::clone(&self.clock),
    );
    let pool = Arc::new(Semaphore::new(self.config.flush.worker_pool_size));

    Ok(IngestionPipeline::from_inner(PipelineInner {
      config: self.config,
      budget,
      buffers,
      workers,
      scheduler,
      checkpoints: CheckpointManager::new(),
      failure: FlushFailure::new(),
      destination: self.destination,
      output: self.output,
      metrics,
      pool,
      summaries: Mutex::new(HashMap::new()),
      lifecycle: Mutex::new(Lifecycle::new()),
    }))
  }
}
