use bytes::Bytes;
use std::collections::HashMap;

use crate::checkpoint::CheckpointId;

/// A record held in a stream buffer.
///
/// `size_bytes` is the externally supplied estimate used for memory
/// accounting; it is not derived from `payload`.
#[derive(Debug, Clone)]
pub struct BufferedRecord {
  /// Serialized record data.
  pub payload: Bytes,
  /// Estimated size used for memory accounting.
  pub size_bytes: u64,
  /// Source-side emission time (milliseconds since Unix epoch).
  pub emitted_at_ms: Option<i64>,
  checkpoint_id: CheckpointId,
}

impl BufferedRecord {
  pub fn new(
    payload: Bytes,
    size_bytes: u64,
    emitted_at_ms: Option<i64>,
    checkpoint_id: CheckpointId,
  ) -> Self {
    Self {
      payload,
      size_bytes,
      emitted_at_ms,
      checkpoint_id,
    }
  }

  /// The checkpoint this record is counted against.
  pub fn checkpoint_id(&self) -> CheckpointId {
    self.checkpoint_id
  }
}

/// An oldest-first prefix removed from a stream buffer for one flush.
#[derive(Debug, Default)]
pub struct DequeuedBatch {
  records: Vec<BufferedRecord>,
  total_bytes: u64,
}

impl DequeuedBatch {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_capacity(cap: usize) -> Self {
    Self {
      records: Vec::with_capacity(cap),
      total_bytes: 0,
    }
  }

  /// Add a record to the batch.
  pub fn push(&mut self, record: BufferedRecord) {
    self.total_bytes += record.size_bytes;
    self.records.push(record);
  }

  /// Returns the records in this batch.
  pub fn records(&self) -> &[BufferedRecord] {
    &self.records
  }

  /// Consume the batch, returning the records.
  pub fn into_records(self) -> Vec<BufferedRecord> {
    self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Sum of the records' estimated sizes.
  pub fn total_bytes(&self) -> u64 {
    self.total_bytes
  }

  /// Number of records per checkpoint, for releasing checkpoint counters
  /// once the batch is flushed.
  pub fn checkpoint_counts(&self) -> HashMap<CheckpointId, u64> {
    let mut counts = HashMap::new();
    for record in &self.records {
      *counts.entry(record.checkpoint_id).or_insert(0) += 1;
    }
    counts
  }
}
