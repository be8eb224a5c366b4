use shared::config::TidewaterConfig;
use tracing::info;

/// Tokio runtime configuration for the `tidewater` binary.
pub struct RuntimeConfig {
  /// Number of Tokio worker threads.
  pub worker_threads: usize,
  /// Thread name prefix.
  pub thread_name: String,
  /// Stack size per worker thread.
  pub thread_stack_size: usize,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      worker_threads: num_cpus(),
      thread_name: "tidewater-worker".to_string(),
      thread_stack_size: 2 * 1024 * 1024, // 2 MiB
    }
  }
}

impl RuntimeConfig {
  /// Size the runtime for a pipeline: one thread per flush worker plus the
  /// scheduler and the reader, bounded by the available cores.
  pub fn from_config(cfg: &TidewaterConfig) -> Self {
    let wanted = cfg.flush.worker_pool_size + 2;
    Self {
      worker_threads: wanted.min(num_cpus()).max(1),
      ..Self::default()
    }
  }

  /// Build a Tokio runtime from this config.
  pub fn build_runtime(&self) -> anyhow::Result<tokio::runtime::Runtime> {
    let rt = tokio::runtime::Builder::new_multi_thread()
      .worker_threads(self.worker_threads)
      .thread_name(&self.thread_name)
      .thread_stack_size(self.thread_stack_size)
      .enable_all()
      .build()?;

    info!(
      workers = self.worker_threads,
      stack_size = self.thread_stack_size,
      "tokio runtime configured"
    );

    Ok(rt)
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism()
    .map(|n| n.get())
    .unwrap_or(4)
}
