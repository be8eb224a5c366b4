use tokio::signal;
use tracing::{info, warn};

/// Tracks the pipeline lifecycle: initializing → running → draining → stopped.
pub struct Lifecycle {
  state: LifecycleState,
}

/// Current lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Built but not started; records are refused.
  Initializing,
  /// Accepting messages and flushing in the background.
  Running,
  /// `close` was called; remaining buffers are being flushed.
  Draining,
  /// Closed.
  Stopped,
}

impl Lifecycle {
  pub fn new() -> Self {
    Self {
      state: LifecycleState::Initializing,
    }
  }

  /// Transition to the next state.
  pub fn transition(&mut self, new_state: LifecycleState) {
    info!(
        from = ?self.state,
        to = ?new_state,
        "lifecycle state transition"
    );
    self.state = new_state;
  }

  /// Current state.
  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// Wait for a shutdown signal (SIGINT or SIGTERM).
  ///
  /// If a handler cannot be installed the corresponding signal is never
  /// observed.
  pub async fn wait_for_shutdown() {
    let ctrl_c = async {
      if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
      }
    };

    #[cfg(unix)]
    let terminate = async {
      match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
          sigterm.recv().await;
        }
        Err(e) => {
          warn!(error = %e, "failed to install SIGTERM handler");
          std::future::pending::<()>().await;
        }
      }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
  }
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}
