use dashmap::DashMap;
use shared::message::StreamId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

use super::batch::{BufferedRecord, DequeuedBatch};
use crate::clock::Clock;

/// Read-only view of buffered data, as seen by the flush scheduler.
pub trait BufferView: Send + Sync {
  /// Every stream that has had a buffer created, empty or not.
  fn buffered_streams(&self) -> Vec<StreamId>;
  /// Bytes currently queued for a stream; `None` if the stream was never seen.
  fn queue_size_bytes(&self, stream: &StreamId) -> Option<u64>;
  /// When the most recent record was enqueued for a stream.
  fn time_of_last_record(&self, stream: &StreamId) -> Option<u64>;
  /// Bytes queued across all streams.
  fn total_global_queue_size_bytes(&self) -> u64;
  /// Configured ceiling for `total_global_queue_size_bytes`.
  fn max_queue_size_bytes(&self) -> u64;
}

#[derive(Debug, Default)]
struct StreamBuffer {
  records: VecDeque<BufferedRecord>,
  /// Sum of `size_bytes` of queued records.
  queued_bytes: u64,
  /// Bytes granted to this stream by the memory budget and not yet returned.
  reserved_bytes: u64,
  last_record_ms: Option<u64>,
}

/// Per-stream FIFO record buffers.
///
/// Each stream has its own lock; the stream index is a `DashMap` so that
/// ingestion into one stream never waits on a flush dequeuing another.
/// A stream can only hold as many bytes as it has reserved from the
/// memory budget: `enqueue` hands the record back when it does not fit,
/// and `dequeue_up_to` shrinks the reservation by what it removes.
pub struct StreamBufferStore {
  buffers: DashMap<StreamId, Arc<Mutex<StreamBuffer>>>,
  total_queued: AtomicU64,
  max_queue_size_bytes: u64,
  clock: Arc<dyn Clock>,
}

fn lock(buffer: &Mutex<StreamBuffer>) -> MutexGuard<'_, StreamBuffer> {
  buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StreamBufferStore {
  pub fn new(max_queue_size_bytes: u64, clock: Arc<dyn Clock>) -> Self {
    Self {
      buffers: DashMap::new(),
      total_queued: AtomicU64::new(0),
      max_queue_size_bytes,
      clock,
    }
  }

  fn buffer(&self, stream: &StreamId) -> Arc<Mutex<StreamBuffer>> {
    if let Some(buffer) = self.buffers.get(stream) {
      return Arc::clone(buffer.value());
    }
    Arc::clone(self.buffers.entry(stream.clone()).or_default().value())
  }

  fn existing(&self, stream: &StreamId) -> Option<Arc<Mutex<StreamBuffer>>> {
    self.buffers.get(stream).map(|b| Arc::clone(b.value()))
  }

  /// Append a record to the stream's queue.
  ///
  /// Returns the record back if the stream's reservation cannot hold it;
  /// the caller is expected to grow the reservation and retry.
  pub fn enqueue(&self, stream: &StreamId, record: BufferedRecord) -> Result<(), BufferedRecord> {
    let buffer = self.buffer(stream);
    let mut buf = lock(&buffer);

    let size = record.size_bytes;
    if buf.queued_bytes.saturating_add(size) > buf.reserved_bytes {
      return Err(record);
    }

    buf.queued_bytes += size;
    buf.last_record_ms = Some(self.clock.now_millis());
    buf.records.push_back(record);
    self.total_queued.fetch_add(size, Ordering::AcqRel);
    Ok(())
  }

  /// Grow a stream's reservation by memory granted from the budget.
  pub fn add_reservation(&self, stream: &StreamId, bytes: u64) {
    let buffer = self.buffer(stream);
    let mut buf = lock(&buffer);
    buf.reserved_bytes += bytes;
    trace!(stream = %stream, reserved = buf.reserved_bytes, "stream reservation grown");
  }

  /// Bytes currently reserved by a stream.
  pub fn reserved_bytes(&self, stream: &StreamId) -> Option<u64> {
    self.existing(stream).map(|b| lock(&b).reserved_bytes)
  }

  /// Number of records currently queued for a stream.
  pub fn queue_record_count(&self, stream: &StreamId) -> Option<usize> {
    self.existing(stream).map(|b| lock(&b).records.len())
  }

  /// Remove the oldest records whose sizes sum to at most `max_bytes`.
  ///
  /// A single record larger than `max_bytes` is still returned on its own
  /// so an oversized record cannot stall its stream. `max_bytes == 0`
  /// never returns anything. The removed bytes leave the stream's
  /// reservation; the caller returns them to the memory budget.
  pub fn dequeue_up_to(&self, stream: &StreamId, max_bytes: u64) -> DequeuedBatch {
    let buffer = match self.existing(stream) {
      Some(b) => b,
      None => return DequeuedBatch::new(),
    };
    if max_bytes == 0 {
      return DequeuedBatch::new();
    }

    let mut buf = lock(&buffer);
    let mut batch = DequeuedBatch::new();
    loop {
      let size = match buf.records.front() {
        Some(record) => record.size_bytes,
        None => break,
      };
      let fits = batch.total_bytes().saturating_add(size) <= max_bytes;
      if !fits && !batch.is_empty() {
        break;
      }
      if let Some(record) = buf.records.pop_front() {
        batch.push(record);
      }
      if !fits {
        break;
      }
    }

    let taken = batch.total_bytes();
    buf.queued_bytes -= taken;
    buf.reserved_bytes = buf.reserved_bytes.saturating_sub(taken);
    self.total_queued.fetch_sub(taken, Ordering::AcqRel);
    batch
  }

  /// Give up the reservation of a stream whose queue is empty, returning
  /// the bytes to free. A stream with queued records keeps its reservation.
  pub fn release_idle_reservation(&self, stream: &StreamId) -> u64 {
    let Some(buffer) = self.existing(stream) else {
      return 0;
    };
    let mut buf = lock(&buffer);
    if !buf.records.is_empty() {
      return 0;
    }
    std::mem::take(&mut buf.reserved_bytes)
  }

  /// Give up the reservations of every stream other than `keep` whose
  /// queue is empty.
  pub fn release_idle_reservations(&self, keep: &StreamId) -> u64 {
    let mut released = 0;
    for entry in self.buffers.iter() {
      if entry.key() == keep {
        continue;
      }
      let mut buf = lock(entry.value());
      if buf.records.is_empty() {
        released += std::mem::take(&mut buf.reserved_bytes);
      }
    }
    released
  }

  /// Give up every stream's unused reservation, returning the total so it
  /// can be freed to the memory budget.
  pub fn release_reservations(&self) -> u64 {
    let mut released = 0;
    for entry in self.buffers.iter() {
      let mut buf = lock(entry.value());
      let unused = buf.reserved_bytes.saturating_sub(buf.queued_bytes);
      buf.reserved_bytes -= unused;
      released += unused;
    }
    released
  }

  /// Returns `true` when no stream has queued bytes.
  pub fn is_drained(&self) -> bool {
    self.total_queued.load(Ordering::Acquire) == 0
  }
}

impl BufferView for StreamBufferStore {
  fn buffered_streams(&self) -> Vec<StreamId> {
    self.buffers.iter().map(|e| e.key().clone()).collect()
  }

  fn queue_size_bytes(&self, stream: &StreamId) -> Option<u64> {
    self.existing(stream).map(|b| lock(&b).queued_bytes)
  }

  fn time_of_last_record(&self, stream: &StreamId) -> Option<u64> {
    self.existing(stream).and_then(|b| lock(&b).last_record_ms)
  }

  fn total_global_queue_size_bytes(&self) -> u64 {
    self.total_queued.load(Ordering::Acquire)
  }

  fn max_queue_size_bytes(&self) -> u64 {
    self.max_queue_size_bytes
  }
}
