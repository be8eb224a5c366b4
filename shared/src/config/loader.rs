use serde::Deserialize;

use crate::error::TidewaterError;

/// Root configuration for a Tidewater pipeline.
///
/// Loaded from TOML files via the `config` crate with environment-variable
/// overrides (prefix: `TIDEWATER_`). Every section has defaults so a
/// partial file (or none of a section) is valid.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TidewaterConfig {
    /// Memory budget shared by every stream buffer.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Flush thresholds and worker pool settings.
    #[serde(default)]
    pub flush: FlushConfig,
    /// Stream identity defaults.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Local destination used by the `tidewater` binary.
    #[serde(default)]
    pub destination: DestinationConfig,
    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Memory budget configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Total bytes that buffered records may occupy.
    #[serde(default = "default_memory_budget")]
    pub budget_bytes: u64,
    /// Size of a single memory grant. Defaults to a third of the budget.
    #[serde(default)]
    pub block_bytes: Option<u64>,
}

/// Flush scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FlushConfig {
    /// Per-stream backlog at which a size-triggered flush fires.
    #[serde(default = "default_queue_flush_threshold")]
    pub queue_flush_threshold_bytes: u64,
    /// Upper bound on the bytes handed to the destination in one batch.
    #[serde(default = "default_optimal_batch_size")]
    pub optimal_batch_size_bytes: u64,
    /// A stream with buffered data is flushed at least this often.
    #[serde(default = "default_time_trigger_interval")]
    pub time_trigger_interval_ms: u64,
    /// Flush as soon as any record is buffered (low-latency mode).
    #[serde(default)]
    pub flush_on_every_message: bool,
    /// Ceiling used for eager-flush detection. Defaults to the memory budget.
    #[serde(default)]
    pub max_global_queue_size_bytes: Option<u64>,
    /// Fraction of `max_global_queue_size_bytes` above which every stream
    /// is flushed regardless of its own threshold.
    #[serde(default = "default_eager_flush_ratio")]
    pub eager_flush_ratio: f64,
    /// Maximum number of concurrent flush tasks.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Delay between scheduler passes.
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_ms: u64,
    /// Delay between memory requests while a producer is blocked.
    #[serde(default = "default_backpressure_backoff")]
    pub backpressure_backoff_ms: u64,
}

/// Stream identity configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamConfig {
    /// Namespace applied to records and checkpoints that carry none.
    #[serde(default)]
    pub default_namespace: Option<String>,
}

/// Local JSONL destination configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    /// Directory that receives one `.jsonl` file per stream.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter (e.g. `info`, `debug`, `trace`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl MemoryConfig {
    /// Resolved block size. The default is a third of the budget, never
    /// less than one byte.
    pub fn block_bytes(&self) -> u64 {
        self.block_bytes
            .unwrap_or((self.budget_bytes / DEFAULT_BLOCK_COUNT).max(1))
    }
}

impl TidewaterConfig {
    /// Resolved eager-flush ceiling.
    pub fn max_global_queue_size_bytes(&self) -> u64 {
        self.flush
            .max_global_queue_size_bytes
            .unwrap_or(self.memory.budget_bytes)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), TidewaterError> {
        if self.memory.budget_bytes == 0 {
            return Err(invalid("memory.budget_bytes", "must be greater than zero"));
        }
        let block = self.memory.block_bytes();
        if block == 0 || block > self.memory.budget_bytes {
            return Err(invalid(
                "memory.block_bytes",
                "must be greater than zero and at most memory.budget_bytes",
            ));
        }
        if self.flush.optimal_batch_size_bytes == 0 {
            return Err(invalid(
                "flush.optimal_batch_size_bytes",
                "must be greater than zero",
            ));
        }
        let ratio = self.flush.eager_flush_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid("flush.eager_flush_ratio", "must be in (0, 1]"));
        }
        if self.flush.worker_pool_size == 0 {
            return Err(invalid("flush.worker_pool_size", "must be at least 1"));
        }
        if self.flush.scheduler_interval_ms == 0 {
            return Err(invalid(
                "flush.scheduler_interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> TidewaterError {
    TidewaterError::ConfigInvalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            budget_bytes: default_memory_budget(),
            block_bytes: None,
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            queue_flush_threshold_bytes: default_queue_flush_threshold(),
            optimal_batch_size_bytes: default_optimal_batch_size(),
            time_trigger_interval_ms: default_time_trigger_interval(),
            flush_on_every_message: false,
            max_global_queue_size_bytes: None,
            eager_flush_ratio: default_eager_flush_ratio(),
            worker_pool_size: default_worker_pool_size(),
            scheduler_interval_ms: default_scheduler_interval(),
            backpressure_backoff_ms: default_backpressure_backoff(),
        }
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ── Default value functions ─────────────────────────────────────────

const DEFAULT_BLOCK_COUNT: u64 = 3;

fn default_memory_budget() -> u64 {
    1_073_741_824
} // 1 GiB
fn default_queue_flush_threshold() -> u64 {
    10_485_760
} // 10 MiB
fn default_optimal_batch_size() -> u64 {
    209_715_200
} // 200 MiB
fn default_time_trigger_interval() -> u64 {
    300_000
} // 5 min
fn default_eager_flush_ratio() -> f64 {
    0.9
}
fn default_worker_pool_size() -> usize {
    5
}
fn default_scheduler_interval() -> u64 {
    1_000
}
fn default_backpressure_backoff() -> u64 {
    10
}
fn default_output_dir() -> String {
    "output".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
