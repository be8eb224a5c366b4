#![cfg(test)]
use shared::error::TidewaterError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::support::*;

const BUDGET: u64 = 10 * 1024;

fn small_budget() -> shared::config::TidewaterConfig {
  let mut cfg = test_config();
  cfg.memory.budget_bytes = BUDGET;
  cfg.flush.worker_pool_size = 1;
  cfg
}

#[tokio::test]
async fn producer_stalls_when_flushes_never_finish() {
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(Arc::new(StalledDestination), log, small_budget());
  pipeline.start().await.unwrap();

  let accepted = AtomicUsize::new(0);
  let produce = async {
    for i in 0..1000 {
      let msg = record("users", i);
      pipeline.accept(&msg, msg.len() as u64).await.unwrap();
      accepted.fetch_add(1, Ordering::SeqCst);
    }
  };
  let outcome = tokio::time::timeout(Duration::from_secs(1), produce).await;

  assert!(outcome.is_err(), "producer should block on the memory budget");
  let accepted = accepted.load(Ordering::SeqCst);
  assert!(accepted > 0);
  assert!(accepted < 1000);
  assert!(pipeline.memory_allocated() <= BUDGET);
  assert!(pipeline.metrics().backpressure_waits.get() >= 1);
}

#[tokio::test]
async fn producer_resumes_as_flushes_free_memory() {
  let destination = Arc::new(RecordingDestination::with_delay(Duration::from_millis(2)));
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination.clone(), log.clone(), small_budget());
  pipeline.start().await.unwrap();

  // Roughly four budgets' worth of records.
  let produce = async {
    for i in 0..2000 {
      let msg = record("users", i);
      pipeline.accept(&msg, msg.len() as u64).await.unwrap();
      assert!(pipeline.memory_allocated() <= BUDGET);
    }
    let msg = stream_state("users", 2000);
    pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  };
  tokio::time::timeout(Duration::from_secs(30), produce)
    .await
    .expect("producer finishes once memory is freed");

  pipeline.close().await.unwrap();
  assert_eq!(destination.record_count(), 2000);
  assert_eq!(log.record_counts(), vec![2000]);
  assert_eq!(pipeline.memory_allocated(), 0);
  assert_eq!(pipeline.queued_bytes(), 0);
}

#[tokio::test]
async fn backpressure_spreads_across_streams() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination.clone(), log, small_budget());
  pipeline.start().await.unwrap();

  let produce = async {
    for i in 0..1500 {
      let stream = ["users", "orders", "items", "events"][i % 4];
      let msg = record(stream, i);
      pipeline.accept(&msg, msg.len() as u64).await.unwrap();
    }
  };
  tokio::time::timeout(Duration::from_secs(30), produce)
    .await
    .expect("no stream starves the others of memory");

  pipeline.close().await.unwrap();
  assert_eq!(destination.record_count(), 1500);
  assert_eq!(pipeline.memory_allocated(), 0);
}

#[tokio::test]
async fn record_larger_than_any_reservation_is_rejected() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination.clone(), log, small_budget());
  pipeline.start().await.unwrap();

  // The default block is a third of the budget; the remainder is never granted.
  let max_reservation = BUDGET / 3 * 3;
  let msg = record("users", 1);
  let err = pipeline.accept(&msg, max_reservation + 1).await.unwrap_err();
  assert!(matches!(
    err,
    TidewaterError::RecordTooLarge { size_bytes, capacity_bytes }
      if size_bytes == max_reservation + 1 && capacity_bytes == max_reservation
  ));

  pipeline.close().await.unwrap();
  assert_eq!(destination.record_count(), 0);
}
