use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Prometheus metrics for one ingestion pipeline.
pub struct PipelineMetrics {
  pub registry: Registry,
  // Ingestion metrics
  pub records_ingested: IntCounter,
  pub checkpoints_ingested: IntCounter,
  pub backpressure_waits: IntCounter,
  // Flush metrics
  pub batches_flushed: IntCounter,
  pub bytes_flushed: IntCounter,
  pub flush_failures: IntCounter,
  pub flush_latency: Histogram,
  pub running_workers: IntGauge,
  // Checkpoint metrics
  pub checkpoints_emitted: IntCounter,
  // Memory metrics
  pub memory_allocated: IntGauge,
  pub memory_capacity: IntGauge,
  pub queue_bytes: IntGauge,
}

impl PipelineMetrics {
  pub fn new() -> anyhow::Result<Self> {
    let registry = Registry::new();

    let records_ingested = IntCounter::new(
      "tidewater_records_ingested_total",
      "Total records accepted into stream buffers",
    )?;
    let checkpoints_ingested = IntCounter::new(
      "tidewater_checkpoints_ingested_total",
      "Total checkpoint messages accepted",
    )?;
    let backpressure_waits = IntCounter::new(
      "tidewater_backpressure_waits_total",
      "Records that waited for the memory budget",
    )?;

    let batches_flushed = IntCounter::new(
      "tidewater_batches_flushed_total",
      "Total batches flushed to the destination",
    )?;
    let bytes_flushed = IntCounter::new(
      "tidewater_bytes_flushed_total",
      "Total estimated bytes flushed to the destination",
    )?;
    let flush_failures = IntCounter::new(
      "tidewater_flush_failures_total",
      "Total failed destination flushes",
    )?;
    let flush_latency = Histogram::with_opts(
      HistogramOpts::new("tidewater_flush_latency_seconds", "Destination flush latency")
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
    )?;
    let running_workers = IntGauge::new(
      "tidewater_running_flush_workers",
      "Flush workers currently in flight",
    )?;

    let checkpoints_emitted = IntCounter::new(
      "tidewater_checkpoints_emitted_total",
      "Total checkpoints emitted after their records were flushed",
    )?;

    let memory_allocated = IntGauge::new(
      "tidewater_memory_allocated_bytes",
      "Bytes currently granted from the memory budget",
    )?;
    let memory_capacity = IntGauge::new("tidewater_memory_capacity_bytes", "Total memory budget")?;
    let queue_bytes = IntGauge::new(
      "tidewater_queue_bytes",
      "Bytes buffered across all streams",
    )?;

    registry.register(Box::new(records_ingested.clone()))?;
    registry.register(Box::new(checkpoints_ingested.clone()))?;
    registry.register(Box::new(backpressure_waits.clone()))?;
    registry.register(Box::new(batches_flushed.clone()))?;
    registry.register(Box::new(bytes_flushed.clone()))?;
    registry.register(Box::new(flush_failures.clone()))?;
    registry.register(Box::new(flush_latency.clone()))?;
    registry.register(Box::new(running_workers.clone()))?;
    registry.register(Box::new(checkpoints_emitted.clone()))?;
    registry.register(Box::new(memory_allocated.clone()))?;
    registry.register(Box::new(memory_capacity.clone()))?;
    registry.register(Box::new(queue_bytes.clone()))?;

    Ok(Self {
      registry,
      records_ingested,
      checkpoints_ingested,
      backpressure_waits,
      batches_flushed,
      bytes_flushed,
      flush_failures,
      flush_latency,
      running_workers,
      checkpoints_emitted,
      memory_allocated,
      memory_capacity,
      queue_bytes,
    })
  }

  /// Encode all metrics in Prometheus text format.
  pub fn encode(&self) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = self.registry.gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf).unwrap_or_default();
    String::from_utf8(buf).unwrap_or_default()
  }
}
