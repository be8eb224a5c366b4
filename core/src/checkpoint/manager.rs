use shared::error::{Result, TidewaterError};
use shared::message::{CheckpointMessage, CheckpointScope, StreamId};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::destination::OutputCollector;

/// Identifies the group of records a future checkpoint will vouch for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointId(u64);

impl CheckpointId {
  pub const fn new(id: u64) -> Self {
    Self(id)
  }

  pub fn get(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for CheckpointId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "cp-{}", self.0)
  }
}

/// How checkpoints partition records. Fixed by the first checkpoint seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
  Stream,
  Global,
}

impl CheckpointMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      CheckpointMode::Stream => "stream",
      CheckpointMode::Global => "global",
    }
  }

  fn of(scope: &CheckpointScope) -> Self {
    match scope {
      CheckpointScope::Stream(_) => CheckpointMode::Stream,
      CheckpointScope::Global => CheckpointMode::Global,
    }
  }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counter {
  /// Records buffered and not yet flushed.
  outstanding: u64,
  /// Records ever tagged with the id.
  total: u64,
}

#[derive(Debug)]
struct Pending {
  ids: Vec<CheckpointId>,
  message: CheckpointMessage,
}

#[derive(Debug, Default)]
struct State {
  mode: Option<CheckpointMode>,
  next_id: u64,
  /// Id new records of a stream are tagged with (stream mode, and any
  /// mode before the first checkpoint).
  open_by_stream: HashMap<StreamId, CheckpointId>,
  /// Single id shared by all streams once in global mode.
  open_global: Option<CheckpointId>,
  counters: HashMap<CheckpointId, Counter>,
  /// Closed checkpoints waiting for their records, in arrival order.
  pending: VecDeque<Pending>,
}

impl State {
  fn allocate(next_id: &mut u64, counters: &mut HashMap<CheckpointId, Counter>) -> CheckpointId {
    let id = CheckpointId(*next_id);
    *next_id += 1;
    counters.insert(id, Counter::default());
    id
  }
}

/// Counts buffered records against the checkpoint that will follow them
/// and releases checkpoints once those records are flushed.
///
/// Checkpoints are released strictly in the order they were tracked: a
/// satisfied checkpoint waits behind an older unsatisfied one.
pub struct CheckpointManager {
  state: Mutex<State>,
}

impl CheckpointManager {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(State::default()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Tag one incoming record of `stream`, returning the open checkpoint id.
  pub fn checkpoint_id_for_record(&self, stream: &StreamId) -> CheckpointId {
    let mut guard = self.lock();
    let State {
      mode,
      next_id,
      open_by_stream,
      open_global,
      counters,
      ..
    } = &mut *guard;

    let id = match mode {
      Some(CheckpointMode::Global) => *open_global.get_or_insert_with(|| State::allocate(next_id, counters)),
      _ => match open_by_stream.get(stream) {
        Some(id) => *id,
        None => {
          let id = State::allocate(next_id, counters);
          open_by_stream.insert(stream.clone(), id);
          id
        }
      },
    };

    let counter = counters.entry(id).or_default();
    counter.outstanding += 1;
    counter.total += 1;
    id
  }

  /// Close the open id(s) covered by `checkpoint` and queue it for emission.
  ///
  /// A global checkpoint closes every open id; from then on all streams
  /// share one id. Mixing stream and global checkpoints is rejected.
  pub fn track(&self, checkpoint: CheckpointMessage) -> Result<()> {
    let mut guard = self.lock();
    let state = &mut *guard;

    let mode = CheckpointMode::of(checkpoint.scope());
    if let Some(current) = state.mode {
      if current != mode {
        return Err(TidewaterError::CheckpointModeMismatch {
          expected: current.as_str(),
          actual: mode.as_str(),
        });
      }
    }
    state.mode = Some(mode);

    let mut ids: Vec<CheckpointId> = match checkpoint.scope() {
      CheckpointScope::Stream(stream) => state.open_by_stream.remove(stream).into_iter().collect(),
      CheckpointScope::Global => {
        let mut ids: Vec<_> = state.open_by_stream.drain().map(|(_, id)| id).collect();
        ids.extend(state.open_global.take());
        ids.sort();
        ids
      }
    };
    if ids.is_empty() {
      ids.push(State::allocate(&mut state.next_id, &mut state.counters));
    }

    debug!(
      scope = %checkpoint.scope(),
      ids = ids.len(),
      pending = state.pending.len() + 1,
      "checkpoint tracked"
    );
    state.pending.push_back(Pending {
      ids,
      message: checkpoint,
    });
    Ok(())
  }

  /// Mark `count` records tagged with `id` as flushed.
  pub fn decrement(&self, id: CheckpointId, count: u64) {
    let mut state = self.lock();
    match state.counters.get_mut(&id) {
      Some(counter) => counter.outstanding = counter.outstanding.saturating_sub(count),
      None => warn!(checkpoint = %id, count, "decrement for unknown checkpoint id"),
    }
  }

  /// Emit every checkpoint at the head of the queue whose records are all
  /// flushed. Returns how many were emitted.
  pub fn flush_states(&self, collector: &dyn OutputCollector) -> usize {
    let mut state = self.lock();
    let mut emitted = 0;

    loop {
      let satisfied = match state.pending.front() {
        Some(front) => front
          .ids
          .iter()
          .all(|id| state.counters.get(id).map_or(true, |c| c.outstanding == 0)),
        None => false,
      };
      if !satisfied {
        break;
      }
      let Some(pending) = state.pending.pop_front() else {
        break;
      };

      let record_count: u64 = pending
        .ids
        .iter()
        .filter_map(|id| state.counters.remove(id))
        .map(|c| c.total)
        .sum();
      let checkpoint = pending.message.into_emitted(record_count);
      debug!(scope = %checkpoint.scope, record_count, "checkpoint emitted");
      collector.emit(checkpoint);
      emitted += 1;
    }

    emitted
  }

  /// Checkpoints tracked but not yet emitted.
  pub fn pending_count(&self) -> usize {
    self.lock().pending.len()
  }

  /// Records buffered and not yet flushed, across all checkpoint ids.
  pub fn outstanding_records(&self) -> u64 {
    self.lock().counters.values().map(|c| c.outstanding).sum()
  }

  pub fn mode(&self) -> Option<CheckpointMode> {
    self.lock().mode
  }
}

impl Default for CheckpointManager {
  fn default() -> Self {
    Self::new()
  }
}
