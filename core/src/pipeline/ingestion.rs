use shared::config::TidewaterConfig;
use shared::error::{Result, TidewaterError};
use shared::message::{deserialize_message, CheckpointMessage, Message, RecordMessage, StreamId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::builder::PipelineBuilder;
use super::failure::FlushFailure;
use super::worker;
use crate::buffer::{BufferView, BufferedRecord, StreamBufferStore};
use crate::checkpoint::CheckpointManager;
use crate::daemon::lifecycle::{Lifecycle, LifecycleState};
use crate::destination::{Destination, OutputCollector, StreamSyncSummary};
use crate::flush::{FlushScheduler, FlushWorkerRegistry};
use crate::memory::MemoryBudget;
use crate::metrics::PipelineMetrics;

/// State shared by the caller, the scheduler loop and flush tasks.
pub(crate) struct PipelineInner {
  pub(crate) config: TidewaterConfig,
  pub(crate) budget: MemoryBudget,
  pub(crate) buffers: Arc<StreamBufferStore>,
  pub(crate) workers: Arc<FlushWorkerRegistry>,
  pub(crate) scheduler: FlushScheduler,
  pub(crate) checkpoints: CheckpointManager,
  pub(crate) failure: FlushFailure,
  pub(crate) destination: Arc<dyn Destination>,
  pub(crate) output: Arc<dyn OutputCollector>,
  pub(crate) metrics: Arc<PipelineMetrics>,
  /// One permit per concurrent flush task.
  pub(crate) pool: Arc<Semaphore>,
  pub(crate) summaries: Mutex<HashMap<StreamId, StreamSyncSummary>>,
  pub(crate) lifecycle: Mutex<Lifecycle>,
}

impl PipelineInner {
  pub(crate) fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
    self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn summaries(&self) -> MutexGuard<'_, HashMap<StreamId, StreamSyncSummary>> {
    self.summaries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Emit satisfied checkpoints and account for them.
  pub(crate) fn flush_states(&self) -> usize {
    let emitted = self.checkpoints.flush_states(self.output.as_ref());
    self.metrics.checkpoints_emitted.inc_by(emitted as u64);
    emitted
  }

  pub(crate) fn update_gauges(&self) {
    self.metrics.memory_allocated.set(self.budget.allocated() as i64);
    self
      .metrics
      .queue_bytes
      .set(self.buffers.total_global_queue_size_bytes() as i64);
    self
      .metrics
      .running_workers
      .set(self.workers.running_worker_count() as i64);
  }
}

/// Buffers records per stream, flushes them to a [`Destination`] in the
/// background and emits checkpoints once their records are durable.
///
/// ```text
/// accept ──▶ MemoryBudget ──▶ StreamBufferStore ◀── FlushScheduler
///   │                                │                    │
///   └──▶ CheckpointManager ◀── flush task ◀── worker pool ◀┘
/// ```
///
/// `accept` suspends while the memory budget is exhausted; that wait is
/// the only backpressure the producer sees. A failed flush is stored and
/// returned from the next `accept` and from `close`.
pub struct IngestionPipeline {
  inner: Arc<PipelineInner>,
  scheduler_task: Mutex<Option<JoinHandle<()>>>,
  shutdown_tx: watch::Sender<bool>,
}

impl IngestionPipeline {
  /// Create a builder for a pipeline writing to `destination` and emitting
  /// checkpoints to `output`.
  pub fn builder(
    destination: Arc<dyn Destination>,
    output: Arc<dyn OutputCollector>,
  ) -> PipelineBuilder {
    PipelineBuilder::new(destination, output)
  }

  pub(crate) fn from_inner(inner: PipelineInner) -> Self {
    let (shutdown_tx, _) = watch::channel(false);
    Self {
      inner: Arc::new(inner),
      scheduler_task: Mutex::new(None),
      shutdown_tx,
    }
  }

  /// Run the destination's start hook and begin background flushing.
  pub async fn start(&self) -> Result<()> {
    match self.inner.lifecycle().state() {
      LifecycleState::Initializing => {}
      LifecycleState::Running => return Err(TidewaterError::AlreadyStarted),
      LifecycleState::Draining | LifecycleState::Stopped => return Err(TidewaterError::Closed),
    }

    self
      .inner
      .destination
      .on_start()
      .await
      .map_err(|e| TidewaterError::DestinationHook {
        hook: "start",
        source: e.into(),
      })?;

    let handle = tokio::spawn(worker::run_scheduler(
      Arc::clone(&self.inner),
      self.shutdown_tx.subscribe(),
    ));
    *self
      .scheduler_task
      .lock()
      .unwrap_or_else(PoisonError::into_inner) = Some(handle);

    self.inner.lifecycle().transition(LifecycleState::Running);
    info!(
      budget = self.inner.budget.capacity(),
      block = self.inner.budget.block_size(),
      pool = self.inner.config.flush.worker_pool_size,
      "ingestion pipeline started"
    );
    Ok(())
  }

  /// Accept one serialized message.
  ///
  /// Records are buffered, waiting for memory if the budget is exhausted.
  /// Checkpoints are queued until every record before them is flushed.
  /// A message that fails to decode leaves the pipeline untouched.
  pub async fn accept(&self, message: &str, estimated_size_bytes: u64) -> Result<()> {
    self.inner.failure.check()?;
    self.ensure_running()?;

    let default_namespace = self.inner.config.stream.default_namespace.as_deref();
    match deserialize_message(message, default_namespace)? {
      Message::Checkpoint(checkpoint) => self.accept_checkpoint(checkpoint),
      Message::Record(record) => self.accept_record(record, estimated_size_bytes).await,
    }
  }

  fn ensure_running(&self) -> Result<()> {
    match self.inner.lifecycle().state() {
      LifecycleState::Running => Ok(()),
      LifecycleState::Initializing => Err(TidewaterError::NotStarted),
      LifecycleState::Draining | LifecycleState::Stopped => Err(TidewaterError::Closed),
    }
  }

  fn accept_checkpoint(&self, checkpoint: CheckpointMessage) -> Result<()> {
    self.inner.checkpoints.track(checkpoint)?;
    self.inner.metrics.checkpoints_ingested.inc();
    self.inner.flush_states();
    Ok(())
  }

  async fn accept_record(&self, record: RecordMessage, size_bytes: u64) -> Result<()> {
    let inner = &self.inner;
    let max_reservation = inner.budget.max_reservation();
    if size_bytes > max_reservation {
      return Err(TidewaterError::RecordTooLarge {
        size_bytes,
        capacity_bytes: max_reservation,
      });
    }

    let stream = record.stream;
    let checkpoint_id = inner.checkpoints.checkpoint_id_for_record(&stream);
    let mut pending = BufferedRecord::new(record.data, size_bytes, record.emitted_at_ms, checkpoint_id);
    let backoff = Duration::from_millis(inner.config.flush.backpressure_backoff_ms);
    let mut waiter = None;

    loop {
      match inner.buffers.enqueue(&stream, pending) {
        Ok(()) => break,
        Err(rejected) => pending = rejected,
      }

      // Grants are bounded by the budget, so this only loops without
      // yielding until the budget is exhausted.
      let granted = inner.budget.request_memory();
      if granted > 0 {
        inner.buffers.add_reservation(&stream, granted);
        inner.metrics.memory_allocated.set(inner.budget.allocated() as i64);
        continue;
      }

      let idle = inner.buffers.release_idle_reservations(&stream);
      if idle > 0 {
        inner.budget.free(idle);
      }

      if waiter.is_none() {
        waiter = Some(inner.scheduler.memory_waiter());
        inner.metrics.backpressure_waits.inc();
        debug!(
          stream = %stream,
          size = size_bytes,
          reserved = inner.buffers.reserved_bytes(&stream).unwrap_or(0),
          allocated = inner.budget.allocated(),
          "memory budget exhausted, waiting"
        );
      }
      tokio::time::sleep(backoff).await;
      inner.failure.check()?;
    }

    drop(waiter);
    inner.metrics.records_ingested.inc();
    inner
      .metrics
      .queue_bytes
      .set(inner.buffers.total_global_queue_size_bytes() as i64);
    Ok(())
  }

  /// Flush everything still buffered, wait for in-flight flushes, emit the
  /// remaining checkpoints and run the destination's close hook.
  ///
  /// Returns the first flush failure instead of calling the close hook if
  /// any flush failed.
  pub async fn close(&self) -> Result<()> {
    {
      let mut lifecycle = self.inner.lifecycle();
      match lifecycle.state() {
        LifecycleState::Running => lifecycle.transition(LifecycleState::Draining),
        LifecycleState::Initializing => return Err(TidewaterError::NotStarted),
        LifecycleState::Draining | LifecycleState::Stopped => return Err(TidewaterError::Closed),
      }
    }

    let inner = &self.inner;
    inner.scheduler.set_closing();
    info!(
      queued = inner.buffers.total_global_queue_size_bytes(),
      "draining stream buffers"
    );

    let poll = Duration::from_millis(inner.config.flush.backpressure_backoff_ms.max(1));
    loop {
      worker::dispatch_available(inner);
      if inner.buffers.is_drained() && inner.workers.running_worker_count() == 0 {
        break;
      }
      tokio::time::sleep(poll).await;
    }

    let _ = self.shutdown_tx.send(true);
    let handle = self
      .scheduler_task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(handle) = handle {
      if let Err(e) = handle.await {
        warn!(error = %e, "scheduler task ended abnormally");
      }
    }

    // Every flush task holds a permit until it has emitted its checkpoints.
    let pool_size = inner.config.flush.worker_pool_size as u32;
    let permits = inner
      .pool
      .acquire_many(pool_size)
      .await
      .map_err(|e| TidewaterError::Internal(e.into()))?;
    drop(permits);

    inner.budget.free(inner.buffers.release_reservations());
    inner.flush_states();
    inner.update_gauges();

    if let Err(err) = inner.failure.check() {
      inner.lifecycle().transition(LifecycleState::Stopped);
      return Err(err);
    }

    let summaries = inner.summaries().clone();
    let pending = inner.checkpoints.pending_count();
    if pending > 0 {
      warn!(pending, "checkpoints left unemitted at close");
    }

    let result = inner
      .destination
      .on_close(&summaries)
      .await
      .map_err(|e| TidewaterError::DestinationHook {
        hook: "close",
        source: e.into(),
      });
    inner.lifecycle().transition(LifecycleState::Stopped);
    info!(streams = summaries.len(), "ingestion pipeline closed");
    result
  }

  /// Current lifecycle state.
  pub fn state(&self) -> LifecycleState {
    self.inner.lifecycle().state()
  }

  /// Bytes currently granted from the memory budget.
  pub fn memory_allocated(&self) -> u64 {
    self.inner.budget.allocated()
  }

  /// Total memory budget.
  pub fn memory_capacity(&self) -> u64 {
    self.inner.budget.capacity()
  }

  /// Bytes buffered across all streams.
  pub fn queued_bytes(&self) -> u64 {
    self.inner.buffers.total_global_queue_size_bytes()
  }

  /// Checkpoints accepted but not yet emitted.
  pub fn pending_checkpoints(&self) -> usize {
    self.inner.checkpoints.pending_count()
  }

  /// Per-stream flush totals so far.
  pub fn summaries(&self) -> HashMap<StreamId, StreamSyncSummary> {
    self.inner.summaries().clone()
  }

  pub fn metrics(&self) -> &Arc<PipelineMetrics> {
    &self.inner.metrics
  }
}

impl Drop for IngestionPipeline {
  fn drop(&mut self) {
    let _ = self.shutdown_tx.send(true);
  }
}
