use dashmap::DashMap;
use shared::error::{Result, TidewaterError};
use shared::message::StreamId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one dispatched flush task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlushWorkerId(u64);

impl FlushWorkerId {
  pub const fn new(id: u64) -> Self {
    Self(id)
  }

  pub fn get(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for FlushWorkerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "worker-{}", self.0)
  }
}

/// In-flight flush sizes, as seen by the flush scheduler.
pub trait RunningWorkers: Send + Sync {
  /// One entry per in-flight worker of `stream`; `None` until the worker
  /// has dequeued its batch.
  fn sizes_of_running_worker_batches(&self, stream: &StreamId) -> Vec<Option<u64>>;
}

/// Tracks in-flight flush workers per stream.
///
/// A worker is tracked when it is dispatched, sized once its batch has
/// been dequeued, and removed when the flush completes.
pub struct FlushWorkerRegistry {
  /// Stream → worker → batch bytes (unknown until dequeued).
  workers: DashMap<StreamId, BTreeMap<FlushWorkerId, Option<u64>>>,
  next_id: AtomicU64,
}

impl FlushWorkerRegistry {
  pub fn new() -> Self {
    Self {
      workers: DashMap::new(),
      next_id: AtomicU64::new(0),
    }
  }

  /// Allocate a fresh worker id.
  pub fn next_worker_id(&self) -> FlushWorkerId {
    FlushWorkerId(self.next_id.fetch_add(1, Ordering::Relaxed))
  }

  /// Start tracking a dispatched worker with an unknown batch size.
  pub fn track_flush_worker(&self, stream: &StreamId, worker: FlushWorkerId) {
    self
      .workers
      .entry(stream.clone())
      .or_default()
      .insert(worker, None);
  }

  /// Record the size of the batch a worker dequeued.
  pub fn register_batch_size(&self, stream: &StreamId, worker: FlushWorkerId, bytes: u64) -> Result<()> {
    let slot = self
      .workers
      .get_mut(stream)
      .and_then(|mut running| running.get_mut(&worker).map(|size| *size = Some(bytes)));
    slot.ok_or_else(|| TidewaterError::FlushWorkerNotTracked {
      stream: stream.to_string(),
      worker: worker.get(),
    })
  }

  /// Stop tracking a finished worker.
  pub fn complete_flush_worker(&self, stream: &StreamId, worker: FlushWorkerId) -> Result<()> {
    let removed = self
      .workers
      .get_mut(stream)
      .and_then(|mut running| running.remove(&worker));
    match removed {
      Some(_) => Ok(()),
      None => Err(TidewaterError::FlushWorkerNotStarted {
        stream: stream.to_string(),
        worker: worker.get(),
      }),
    }
  }

  /// In-flight workers across every stream.
  pub fn running_worker_count(&self) -> usize {
    self.workers.iter().map(|e| e.value().len()).sum()
  }
}

impl Default for FlushWorkerRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl RunningWorkers for FlushWorkerRegistry {
  fn sizes_of_running_worker_batches(&self, stream: &StreamId) -> Vec<Option<u64>> {
    self
      .workers
      .get(stream)
      .map(|running| running.values().copied().collect())
      .unwrap_or_default()
  }
}
