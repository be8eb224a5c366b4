use shared::config::TidewaterConfig;

const MB: u64 = 1024 * 1024;

/// Thresholds the flush scheduler decides against.
///
/// A stream is flushed when EITHER condition fires first:
/// 1. Its backlog, net of what in-flight workers are already flushing,
///    reaches the queue threshold.
/// 2. It has not been flushed for `time_trigger_interval_ms`.
///
/// The queue threshold drops to zero (flush everything) while the pipeline
/// closes, while the global queue is above `eager_flush_ratio` of its
/// ceiling, or when `flush_on_every_message` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushThresholdPolicy {
  pub queue_flush_threshold_bytes: u64,
  /// Cap on a single batch, and the assumed size of a not-yet-sized worker.
  pub optimal_batch_size_bytes: u64,
  pub time_trigger_interval_ms: u64,
  pub flush_on_every_message: bool,
  pub max_global_queue_size_bytes: u64,
  pub eager_flush_ratio: f64,
}

impl FlushThresholdPolicy {
  /// Create from the pipeline config.
  pub fn from_config(cfg: &TidewaterConfig) -> Self {
    Self {
      queue_flush_threshold_bytes: cfg.flush.queue_flush_threshold_bytes,
      optimal_batch_size_bytes: cfg.flush.optimal_batch_size_bytes,
      time_trigger_interval_ms: cfg.flush.time_trigger_interval_ms,
      flush_on_every_message: cfg.flush.flush_on_every_message,
      max_global_queue_size_bytes: cfg.max_global_queue_size_bytes(),
      eager_flush_ratio: cfg.flush.eager_flush_ratio,
    }
  }
}

impl Default for FlushThresholdPolicy {
  fn default() -> Self {
    Self {
      queue_flush_threshold_bytes: 10 * MB,
      optimal_batch_size_bytes: 200 * MB,
      time_trigger_interval_ms: 5 * 60 * 1000,
      flush_on_every_message: false,
      max_global_queue_size_bytes: 1024 * MB,
      eager_flush_ratio: 0.9,
    }
  }
}
