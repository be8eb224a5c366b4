use shared::message::StreamId;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

use super::policy::FlushThresholdPolicy;
use super::registry::RunningWorkers;
use crate::buffer::BufferView;
use crate::clock::Clock;

/// Decides whether a flush should run now, and for which stream.
///
/// Reads buffer and worker state through [`BufferView`] and
/// [`RunningWorkers`]; the only state it owns is the per-stream time of
/// the last flush decision, the closing flag and the number of producers
/// waiting for memory. The last two force a zero threshold.
pub struct FlushScheduler {
  buffers: Arc<dyn BufferView>,
  workers: Arc<dyn RunningWorkers>,
  policy: FlushThresholdPolicy,
  clock: Arc<dyn Clock>,
  closing: AtomicBool,
  /// Producers currently waiting for the memory budget.
  memory_waiters: AtomicUsize,
  /// Stream → time it was last chosen (or first observed).
  last_flush_ms: Mutex<HashMap<StreamId, u64>>,
}

impl FlushScheduler {
  pub fn new(
    buffers: Arc<dyn BufferView>,
    workers: Arc<dyn RunningWorkers>,
    policy: FlushThresholdPolicy,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      buffers,
      workers,
      policy,
      clock,
      closing: AtomicBool::new(false),
      memory_waiters: AtomicUsize::new(0),
      last_flush_ms: Mutex::new(HashMap::new()),
    }
  }

  pub fn policy(&self) -> &FlushThresholdPolicy {
    &self.policy
  }

  /// From now on every buffered byte is flushed immediately.
  pub fn set_closing(&self) {
    self.closing.store(true, Ordering::Release);
  }

  pub fn is_closing(&self) -> bool {
    self.closing.load(Ordering::Acquire)
  }

  /// Register a producer waiting for memory. While any returned guard is
  /// alive every buffered byte is flushed immediately so blocked producers
  /// get memory back.
  pub fn memory_waiter(&self) -> MemoryWaiter<'_> {
    self.memory_waiters.fetch_add(1, Ordering::AcqRel);
    MemoryWaiter { scheduler: self }
  }

  /// Producers currently waiting for memory.
  pub fn memory_waiters(&self) -> usize {
    self.memory_waiters.load(Ordering::Acquire)
  }

  /// Backlog at which a stream is size-triggered in the current pass.
  pub fn compute_queue_threshold(&self) -> u64 {
    if self.is_closing() || self.memory_waiters() > 0 {
      return 0;
    }

    let max = self.buffers.max_queue_size_bytes();
    if max > 0 {
      let ratio = self.buffers.total_global_queue_size_bytes() as f64 / max as f64;
      if ratio >= self.policy.eager_flush_ratio {
        trace!(ratio, "global queue above eager flush ratio");
        return 0;
      }
    }

    if self.policy.flush_on_every_message {
      return 0;
    }
    self.policy.queue_flush_threshold_bytes
  }

  /// Bytes of `stream` already being drained by in-flight workers.
  ///
  /// A worker that has not dequeued yet is assumed to take
  /// `candidate_bytes`, capped at the optimal batch size.
  pub fn estimate_size_of_running_workers(&self, stream: &StreamId, candidate_bytes: u64) -> u64 {
    let assumed = candidate_bytes.min(self.policy.optimal_batch_size_bytes);
    self
      .workers
      .sizes_of_running_worker_batches(stream)
      .into_iter()
      .map(|size| size.unwrap_or(assumed))
      .sum()
  }

  /// Returns whether the stream's backlog, net of in-flight work, reaches
  /// `threshold`, together with that net backlog.
  pub fn is_size_triggered(&self, stream: &StreamId, threshold: u64) -> (bool, u64) {
    let queue = self.buffers.queue_size_bytes(stream).unwrap_or(0);
    let running = self.estimate_size_of_running_workers(stream, queue);
    let effective = queue.saturating_sub(running);
    (effective >= threshold, effective)
  }

  /// Returns whether the time trigger interval has elapsed since
  /// `last_flush_ms`, together with the elapsed time.
  pub fn is_time_triggered(&self, last_flush_ms: u64) -> (bool, u64) {
    let elapsed = self.clock.now_millis().saturating_sub(last_flush_ms);
    (elapsed >= self.policy.time_trigger_interval_ms, elapsed)
  }

  /// Sort by backlog descending, then oldest last record first (streams
  /// without records last), then name and namespace.
  pub fn order_streams_by_priority(&self, streams: Vec<StreamId>) -> Vec<StreamId> {
    let mut keyed: Vec<(u64, Option<u64>, StreamId)> = streams
      .into_iter()
      .map(|s| {
        let size = self.buffers.queue_size_bytes(&s).unwrap_or(0);
        let last = self.buffers.time_of_last_record(&s);
        (size, last, s)
      })
      .collect();

    keyed.sort_by(|a, b| {
      b.0
        .cmp(&a.0)
        .then_with(|| oldest_first(a.1, b.1))
        .then_with(|| a.2.cmp(&b.2))
    });
    keyed.into_iter().map(|(_, _, s)| s).collect()
  }

  /// Pick the highest-priority stream that is size- or time-triggered.
  ///
  /// The chosen stream's last flush time is reset to now. Streams whose
  /// whole backlog is already in flight are never chosen.
  pub fn next_stream_to_flush(&self) -> Option<StreamId> {
    let threshold = self.compute_queue_threshold();
    let now = self.clock.now_millis();
    let ordered = self.order_streams_by_priority(self.buffers.buffered_streams());

    let mut last_flush = self
      .last_flush_ms
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    for stream in ordered {
      let last = *last_flush.entry(stream.clone()).or_insert(now);
      let (size_triggered, effective) = self.is_size_triggered(&stream, threshold);
      if effective == 0 {
        continue;
      }
      let (time_triggered, elapsed) = self.is_time_triggered(last);

      if size_triggered || time_triggered {
        debug!(
          stream = %stream,
          effective_bytes = effective,
          threshold,
          size_triggered,
          time_triggered,
          elapsed_ms = elapsed,
          "flush triggered"
        );
        last_flush.insert(stream.clone(), now);
        return Some(stream);
      }
    }
    None
  }
}

/// Marks one producer as waiting for memory until dropped.
pub struct MemoryWaiter<'a> {
  scheduler: &'a FlushScheduler,
}

impl Drop for MemoryWaiter<'_> {
  fn drop(&mut self) {
    self.scheduler.memory_waiters.fetch_sub(1, Ordering::AcqRel);
  }
}

fn oldest_first(a: Option<u64>, b: Option<u64>) -> CmpOrdering {
  match (a, b) {
    (Some(x), Some(y)) => x.cmp(&y),
    (Some(_), None) => CmpOrdering::Less,
    (None, Some(_)) => CmpOrdering::Greater,
    (None, None) => CmpOrdering::Equal,
  }
}
