#![cfg(test)]
use shared::error::TidewaterError;
use std::sync::Arc;
use std::time::Duration;
use tidewater_core::daemon::LifecycleState;

use crate::support::*;

#[tokio::test]
async fn flush_failure_fails_later_accepts_and_close() {
  let destination = Arc::new(RecordingDestination::failing_for("users"));
  let log = Arc::new(CheckpointLog::default());
  let mut cfg = test_config();
  cfg.flush.flush_on_every_message = true;
  let pipeline = build(destination.clone(), log.clone(), cfg);
  pipeline.start().await.unwrap();

  let msg = record("users", 1);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  // The failing flush may already have landed.
  let msg = stream_state("users", 1);
  let _ = pipeline.accept(&msg, msg.len() as u64).await;

  let mut failed = None;
  for i in 0..1000 {
    let msg = record("orders", i);
    if let Err(err) = pipeline.accept(&msg, msg.len() as u64).await {
      failed = Some(err);
      break;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  let err = failed.expect("a later accept observes the flush failure");
  assert!(matches!(err, TidewaterError::FlushFailed { ref stream, .. } if stream == "users"));

  let err = pipeline.close().await.unwrap_err();
  assert!(matches!(err, TidewaterError::FlushFailed { .. }));
  assert_eq!(pipeline.state(), LifecycleState::Stopped);
  // The close hook is skipped and the failed stream's checkpoint is never emitted.
  assert!(destination.closed_with.lock().unwrap().is_none());
  assert!(log.emitted().is_empty());
}

#[tokio::test]
async fn failure_during_close_is_returned() {
  let destination = Arc::new(RecordingDestination::failing_for("users"));
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination.clone(), log, test_config());
  pipeline.start().await.unwrap();

  for i in 0..10 {
    let msg = record("users", i);
    pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  }
  let err = pipeline.close().await.unwrap_err();
  assert!(matches!(err, TidewaterError::FlushFailed { .. }));
  assert_eq!(pipeline.memory_allocated(), 0);
}

#[tokio::test]
async fn malformed_messages_leave_pipeline_intact() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination.clone(), log.clone(), test_config());
  pipeline.start().await.unwrap();

  let err = pipeline.accept("{not json", 9).await.unwrap_err();
  assert!(matches!(err, TidewaterError::MalformedMessage(_)));
  let log_line = r#"{"type":"LOG","log":{"level":"INFO","message":"hello"}}"#;
  let err = pipeline.accept(log_line, log_line.len() as u64).await.unwrap_err();
  assert!(matches!(err, TidewaterError::UnsupportedMessage(_)));
  let err = pipeline.accept(r#"{"type":"RECORD"}"#, 17).await.unwrap_err();
  assert!(matches!(err, TidewaterError::MissingMessageBody { .. }));

  assert_eq!(pipeline.queued_bytes(), 0);
  assert_eq!(pipeline.pending_checkpoints(), 0);

  let msg = record("users", 1);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  let msg = stream_state("users", 1);
  pipeline.accept(&msg, msg.len() as u64).await.unwrap();
  pipeline.close().await.unwrap();

  assert_eq!(log.record_counts(), vec![1]);
  assert_eq!(destination.record_count(), 1);
}

#[tokio::test]
async fn lifecycle_misuse_is_rejected() {
  let destination = Arc::new(RecordingDestination::new());
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination, log, test_config());

  let msg = record("users", 1);
  assert!(matches!(
    pipeline.accept(&msg, msg.len() as u64).await,
    Err(TidewaterError::NotStarted)
  ));
  assert!(matches!(pipeline.close().await, Err(TidewaterError::NotStarted)));

  pipeline.start().await.unwrap();
  assert!(matches!(pipeline.start().await, Err(TidewaterError::AlreadyStarted)));
  pipeline.close().await.unwrap();

  assert!(matches!(
    pipeline.accept(&msg, msg.len() as u64).await,
    Err(TidewaterError::Closed)
  ));
  assert!(matches!(pipeline.close().await, Err(TidewaterError::Closed)));
}

#[tokio::test]
async fn start_hook_failure_is_reported() {
  let destination = Arc::new(RecordingDestination::failing_on_start());
  let log = Arc::new(CheckpointLog::default());
  let pipeline = build(destination, log, test_config());

  let err = pipeline.start().await.unwrap_err();
  assert!(matches!(err, TidewaterError::DestinationHook { hook: "start", .. }));
  assert_eq!(pipeline.state(), LifecycleState::Initializing);
}
