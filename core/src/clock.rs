use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in milliseconds since the Unix epoch.
///
/// Injected into the buffer store and the flush scheduler so time-based
/// triggers can be driven deterministically.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> u64 {
    SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_millis() as u64
  }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicU64,
}

impl ManualClock {
  pub fn new(start_millis: u64) -> Self {
    Self {
      now: AtomicU64::new(start_millis),
    }
  }

  pub fn set(&self, millis: u64) {
    self.now.store(millis, Ordering::Release);
  }

  pub fn advance(&self, millis: u64) {
    self.now.fetch_add(millis, Ordering::AcqRel);
  }
}

impl Clock for ManualClock {
  fn now_millis(&self) -> u64 {
    self.now.load(Ordering::Acquire)
  }
}
