use futures::FutureExt;
use shared::message::StreamId;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace};

use super::ingestion::PipelineInner;
use crate::flush::FlushWorkerId;

/// Periodically dispatch flushes until shutdown is signalled.
pub(crate) async fn run_scheduler(inner: Arc<PipelineInner>, mut shutdown: watch::Receiver<bool>) {
  let period = Duration::from_millis(inner.config.flush.scheduler_interval_ms);
  let mut ticker = tokio::time::interval(period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        let dispatched = dispatch_available(&inner);
        if dispatched > 0 {
          trace!(dispatched, "scheduler pass");
        }
      }
      changed = shutdown.changed() => {
        if changed.is_err() || *shutdown.borrow() {
          break;
        }
      }
    }
  }
  debug!("flush scheduler stopped");
}

/// Dispatch a flush task for every triggered stream while pool permits
/// are free. Returns how many tasks were spawned.
pub(crate) fn dispatch_available(inner: &Arc<PipelineInner>) -> usize {
  let mut dispatched = 0;
  loop {
    let permit = match Arc::clone(&inner.pool).try_acquire_owned() {
      Ok(permit) => permit,
      Err(_) => break,
    };
    let Some(stream) = inner.scheduler.next_stream_to_flush() else {
      break;
    };

    let worker = inner.workers.next_worker_id();
    inner.workers.track_flush_worker(&stream, worker);
    inner
      .metrics
      .running_workers
      .set(inner.workers.running_worker_count() as i64);
    debug!(stream = %stream, worker = %worker, "flush dispatched");

    tokio::spawn(flush_stream(Arc::clone(inner), stream, worker, permit));
    dispatched += 1;
  }
  dispatched
}

/// Body of one flush task. The permit is held until checkpoints are emitted.
async fn flush_stream(
  inner: Arc<PipelineInner>,
  stream: StreamId,
  worker: FlushWorkerId,
  _permit: OwnedSemaphorePermit,
) {
  let optimal = inner.scheduler.policy().optimal_batch_size_bytes;
  let batch = inner.buffers.dequeue_up_to(&stream, optimal);
  let idle = inner.buffers.release_idle_reservation(&stream);
  if idle > 0 {
    inner.budget.free(idle);
  }

  if batch.is_empty() {
    complete(&inner, &stream, worker);
    inner.update_gauges();
    return;
  }

  let bytes = batch.total_bytes();
  let records = batch.len() as u64;
  if let Err(e) = inner.workers.register_batch_size(&stream, worker, bytes) {
    error!(stream = %stream, worker = %worker, error = %e, "flush worker registry out of sync");
  }
  let counts = batch.checkpoint_counts();

  let started = Instant::now();
  let outcome = AssertUnwindSafe(inner.destination.flush(&stream, batch.records()))
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| {
      Err(anyhow::anyhow!(
        "destination flush panicked: {}",
        panic_message(panic.as_ref())
      ))
    });
  inner
    .metrics
    .flush_latency
    .observe(started.elapsed().as_secs_f64());

  match outcome {
    Ok(written) => {
      for (id, count) in counts {
        inner.checkpoints.decrement(id, count);
      }
      inner
        .summaries()
        .entry(stream.clone())
        .or_default()
        .record_batch(records, bytes);
      inner.metrics.batches_flushed.inc();
      inner.metrics.bytes_flushed.inc_by(bytes);
      debug!(
        stream = %stream,
        worker = %worker,
        records,
        bytes,
        written = written.records_written,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "batch flushed"
      );
    }
    Err(err) => {
      inner.metrics.flush_failures.inc();
      inner.failure.propagate(&stream, err);
    }
  }

  drop(batch);
  inner.budget.free(bytes);
  complete(&inner, &stream, worker);
  inner.flush_states();
  inner.update_gauges();
}

fn complete(inner: &PipelineInner, stream: &StreamId, worker: FlushWorkerId) {
  if let Err(e) = inner.workers.complete_flush_worker(stream, worker) {
    error!(stream = %stream, worker = %worker, error = %e, "flush worker registry out of sync");
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
  if let Some(s) = panic.downcast_ref::<&'static str>() {
    s
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.as_str()
  } else {
    "non-string panic payload"
  }
}
