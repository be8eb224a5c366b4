use async_trait::async_trait;
use shared::message::{EmittedCheckpoint, StreamId};
use std::collections::HashMap;

use crate::buffer::BufferedRecord;

/// What the destination reports back for one flushed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
  pub records_written: u64,
  pub bytes_written: u64,
}

impl BatchResult {
  pub fn new(records_written: u64, bytes_written: u64) -> Self {
    Self {
      records_written,
      bytes_written,
    }
  }
}

/// Per-stream totals handed to [`Destination::on_close`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSyncSummary {
  /// Records dequeued and successfully flushed.
  pub records_flushed: u64,
  /// Estimated bytes of those records.
  pub bytes_flushed: u64,
  /// Successful flush calls.
  pub batches: u64,
}

impl StreamSyncSummary {
  pub(crate) fn record_batch(&mut self, records: u64, bytes: u64) {
    self.records_flushed += records;
    self.bytes_flushed += bytes;
    self.batches += 1;
  }
}

/// A sink that persists batches of buffered records.
///
/// `flush` may be called concurrently for different streams, and
/// repeatedly for the same stream with disjoint, FIFO-ordered batches.
/// It may be slow; the pipeline never calls it with an empty batch.
#[async_trait]
pub trait Destination: Send + Sync + 'static {
  /// Called once from `IngestionPipeline::start` before any flush.
  async fn on_start(&self) -> anyhow::Result<()> {
    Ok(())
  }

  /// Persist one batch for `stream`.
  async fn flush(&self, stream: &StreamId, batch: &[BufferedRecord]) -> anyhow::Result<BatchResult>;

  /// Called once from `IngestionPipeline::close` after every batch was
  /// flushed successfully.
  async fn on_close(&self, _summaries: &HashMap<StreamId, StreamSyncSummary>) -> anyhow::Result<()> {
    Ok(())
  }
}

/// Receives checkpoints once every record counted against them is flushed.
///
/// Called with the checkpoint manager's lock held, so calls arrive in
/// ingestion order and must not re-enter the pipeline.
pub trait OutputCollector: Send + Sync {
  fn emit(&self, checkpoint: EmittedCheckpoint);
}

impl<F> OutputCollector for F
where
  F: Fn(EmittedCheckpoint) + Send + Sync,
{
  fn emit(&self, checkpoint: EmittedCheckpoint) {
    self(checkpoint)
  }
}
