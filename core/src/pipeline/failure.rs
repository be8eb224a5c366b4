use shared::error::{Result, TidewaterError};
use shared::message::StreamId;
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, warn};

type SharedError = Arc<dyn Error + Send + Sync>;

/// First-failure-wins slot for background flush errors.
///
/// Flush tasks record their error here instead of crashing; `accept` and
/// `close` check it and surface the stored error. Once set the slot never
/// changes, so every later check returns the same failure.
pub struct FlushFailure {
  failed: AtomicBool,
  first: Mutex<Option<(StreamId, SharedError)>>,
  /// Failures observed after the first one.
  suppressed: AtomicU64,
}

impl FlushFailure {
  pub fn new() -> Self {
    Self {
      failed: AtomicBool::new(false),
      first: Mutex::new(None),
      suppressed: AtomicU64::new(0),
    }
  }

  /// Record a flush failure. Returns `true` if it was the first one.
  pub fn propagate(&self, stream: &StreamId, err: anyhow::Error) -> bool {
    let message = format!("{:#}", err);
    let mut first = self.first.lock().unwrap_or_else(PoisonError::into_inner);
    if first.is_some() {
      self.suppressed.fetch_add(1, Ordering::Relaxed);
      warn!(stream = %stream, error = %message, "additional flush failure dropped");
      return false;
    }

    error!(
      stream = %stream,
      error = %message,
      "flush failed, ingestion will be refused"
    );
    let boxed: Box<dyn Error + Send + Sync> = err.into();
    *first = Some((stream.clone(), Arc::from(boxed)));
    self.failed.store(true, Ordering::Release);
    true
  }

  pub fn is_failed(&self) -> bool {
    self.failed.load(Ordering::Acquire)
  }

  /// `Err` with the first recorded failure, if any.
  pub fn check(&self) -> Result<()> {
    if !self.is_failed() {
      return Ok(());
    }
    let first = self.first.lock().unwrap_or_else(PoisonError::into_inner);
    match first.as_ref() {
      Some((stream, source)) => Err(TidewaterError::FlushFailed {
        stream: stream.to_string(),
        source: Arc::clone(source),
      }),
      None => Ok(()),
    }
  }

  pub fn suppressed_count(&self) -> u64 {
    self.suppressed.load(Ordering::Relaxed)
  }
}

impl Default for FlushFailure {
  fn default() -> Self {
    Self::new()
  }
}
