use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Fixed-capacity memory budget handed out in equal blocks.
///
/// Stream buffers grow their reservation one block at a time. A request
/// that would push the allocated total above capacity is refused with a
/// zero grant; callers wait and retry, which is what turns a full budget
/// into backpressure on the producer.
pub struct MemoryBudget {
  /// Total allowed bytes.
  capacity_bytes: u64,
  /// Bytes granted per successful request.
  block_bytes: u64,
  /// Currently allocated bytes.
  allocated: Arc<AtomicU64>,
}

impl MemoryBudget {
  /// Create a budget. `block_bytes` is clamped to `1..=capacity_bytes`.
  pub fn new(capacity_bytes: u64, block_bytes: u64) -> Self {
    Self {
      capacity_bytes,
      block_bytes: block_bytes.clamp(1, capacity_bytes.max(1)),
      allocated: Arc::new(AtomicU64::new(0)),
    }
  }

  pub fn from_config(cfg: &shared::config::MemoryConfig) -> Self {
    Self::new(cfg.budget_bytes, cfg.block_bytes())
  }

  /// Try to allocate one block.
  ///
  /// Returns the number of bytes granted: a full block, or 0 when the
  /// block does not fit in the remaining capacity.
  pub fn request_memory(&self) -> u64 {
    loop {
      let current = self.allocated.load(Ordering::Acquire);
      let next = current.saturating_add(self.block_bytes);
      if next > self.capacity_bytes {
        trace!(
          allocated = current,
          capacity = self.capacity_bytes,
          "memory budget exhausted"
        );
        return 0;
      }
      if self
        .allocated
        .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
        .is_ok()
      {
        return self.block_bytes;
      }
    }
  }

  /// Return bytes to the budget. Frees beyond the allocated total clamp
  /// the counter at zero.
  pub fn free(&self, bytes: u64) {
    let _ = self
      .allocated
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_sub(bytes))
      });
  }

  /// Currently allocated bytes.
  pub fn allocated(&self) -> u64 {
    self.allocated.load(Ordering::Relaxed)
  }

  /// Total budget in bytes.
  pub fn capacity(&self) -> u64 {
    self.capacity_bytes
  }

  /// Size of one grant.
  pub fn block_size(&self) -> u64 {
    self.block_bytes
  }

  /// Largest reservation one stream can ever hold: every whole block that
  /// fits in the capacity.
  pub fn max_reservation(&self) -> u64 {
    self.capacity_bytes / self.block_bytes * self.block_bytes
  }

  /// Allocation as a fraction of the budget (0.0–1.0).
  pub fn usage_ratio(&self) -> f64 {
    if self.capacity_bytes == 0 {
      return 1.0;
    }
    self.allocated() as f64 / self.capacity_bytes as f64
  }

  /// Bytes not yet allocated.
  pub fn remaining(&self) -> u64 {
    self.capacity_bytes.saturating_sub(self.allocated())
  }
}

impl Clone for MemoryBudget {
  fn clone(&self) -> Self {
    Self {
      capacity_bytes: self.capacity_bytes,
      block_bytes: self.block_bytes,
      allocated: Arc::clone(&self.allocated),
    }
  }
}
