#![cfg(test)]
use serde_json::{json, Value};
use shared::error::TidewaterError;
use shared::message::{CheckpointScope, StreamId};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tidewater_core::daemon::LifecycleState;

use crate::support::*;

#[tokio::test]
async fn checkpoint_reports_records_flushed_before_it() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination.clone(), log.clone(), test_config());
  pipeline.start().await.unwrap();
  assert!(destination.started.load(Ordering::SeqCst));

  for i in 0..1000 {
    let msg = record("users", i);
    pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  }
  let first = stream_state("users", 1000);
  pipeline.accept(&first, first.len() as u64).await.unwrap();
  let second = stream_state("users", 1000);
  pipeline.accept(&second, second.len() as u64).await.unwrap();

  pipeline.close().await.unwrap();

  assert_eq!(log.record_counts(), vec![1000, 0]);
  assert_eq!(destination.records_for(&StreamId::named("users")).len(), 1000);
  let emitted = log.emitted();
  assert_eq!(
    emitted[0].message["state"]["destination_stats"]["record_count"],
    json!(1000)
  );
  assert_eq!(emitted[0].message["state"]["stream"]["stream_state"]["cursor"], json!(1000));
  assert_eq!(pipeline.pending_checkpoints(), 0);
  assert_eq!(pipeline.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn records_reach_destination_in_arrival_order() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let mut cfg = test_config();
  cfg.flush.worker_pool_size = 1;
  cfg.flush.queue_flush_threshold_bytes = 256;
  cfg.flush.optimal_batch_size_bytes = 128;
  let pipeline = build(destination.clone(), log, cfg);
  pipeline.start().await.unwrap();

  for i in 0..300 {
    let msg = record("events", i);
    pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  }
  pipeline.close().await.unwrap();

  let ids: Vec<u64> = destination
    .records_for(&StreamId::named("events"))
    .iter()
    .map(|p| serde_json::from_str::<Value>(p).unwrap()["id"].as_u64().unwrap())
    .collect();
  assert_eq!(ids, (0..300).collect::<Vec<u64>>());
  assert!(destination.batch_count() > 1);
}

#[tokio::test]
async fn stream_checkpoints_count_only_their_stream() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination.clone(), log.clone(), test_config());
  pipeline.start().await.unwrap();

  for (stream, n) in [("users", 3), ("orders", 2), ("users", 4)] {
    for i in 0..n {
      let msg = record(stream, i);
      pipeline.accept(&msg, msg.len() as u64).await.unwrap();
    }
  }
  for msg in [stream_state("orders", 2), stream_state("users", 7)] {
    pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  }
  pipeline.close().await.unwrap();

  let emitted = log.emitted();
  assert_eq!(emitted.len(), 2);
  assert_eq!(emitted[0].scope, CheckpointScope::Stream(StreamId::named("orders")));
  assert_eq!(emitted[0].record_count, 2);
  assert_eq!(emitted[1].scope, CheckpointScope::Stream(StreamId::named("users")));
  assert_eq!(emitted[1].record_count, 7);

  let summaries = destination.closed_with.lock().unwrap().clone().unwrap();
  assert_eq!(summaries[&StreamId::named("users")].records_flushed, 7);
  assert_eq!(summaries[&StreamId::named("orders")].records_flushed, 2);
}

#[tokio::test]
async fn global_checkpoint_covers_every_stream() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination, log.clone(), test_config());
  pipeline.start().await.unwrap();

  for stream in ["users", "orders", "items"] {
    for i in 0..5 {
      let msg = record(stream, i);
      pipeline.accept(&msg, msg.len() as u64).await.unwrap();
    }
  }
  let msg = global_state(1);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  let msg = record("users", 99);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  let msg = global_state(2);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  pipeline.close().await.unwrap();

  let emitted = log.emitted();
  assert!(emitted.iter().all(|c| c.scope.is_global()));
  assert_eq!(log.record_counts(), vec![15, 1]);
}

#[tokio::test]
async fn mixing_checkpoint_modes_is_rejected() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination, log.clone(), test_config());
  pipeline.start().await.unwrap();

  let msg = stream_state("users", 1);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  let msg = global_state(1);
  let err = pipeline.accept(&msg, msg.len() as u64).await.unwrap_err();
  assert!(matches!(err, TidewaterError::CheckpointModeMismatch { .. }));

  pipeline.close().await.unwrap();
  assert_eq!(log.record_counts(), vec![0]);
}

#[tokio::test]
async fn default_namespace_applies_to_records_and_checkpoints() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let mut cfg = test_config();
  cfg.stream.default_namespace = Some("public".to_string());
  let pipeline = build(destination.clone(), log.clone(), cfg);
  pipeline.start().await.unwrap();

  let msg = record("users", 1);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  let msg = record_in("public", "users", 2);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  let msg = stream_state("users", 2);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  pipeline.close().await.unwrap();

  let users = StreamId::new("public", "users");
  assert_eq!(destination.records_for(&users).len(), 2);
  assert_eq!(log.emitted()[0].scope, CheckpointScope::Stream(users));
  assert_eq!(log.record_counts(), vec![2]);
}

#[tokio::test]
async fn checkpoints_are_emitted_while_running() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let mut cfg = test_config();
  cfg.flush.flush_on_every_message = true;
  let pipeline = build(destination.clone(), log.clone(), cfg);
  pipeline.start().await.unwrap();

  for i in 0..20 {
    let msg = record("users", i);
    pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  }
  let msg = stream_state("users", 20);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();

  assert!(eventually(Duration::from_secs(5), || log.len() == 1).await);
  assert_eq!(log.record_counts(), vec![20]);
  assert_eq!(pipeline.state(), LifecycleState::Running);

  pipeline.close().await.unwrap();
  assert_eq!(destination.record_count(), 20);
}

#[tokio::test]
async fn time_trigger_flushes_small_streams() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let mut cfg = test_config();
  cfg.flush.time_trigger_interval_ms = 20;
  let pipeline = build(destination.clone(), log, cfg);
  pipeline.start().await.unwrap();

  let msg = record("users", 1);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  assert!(eventually(Duration::from_secs(5), || destination.record_count() == 1).await);

  pipeline.close().await.unwrap();
}
