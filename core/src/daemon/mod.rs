pub mod lifecycle;
pub mod runtime;

pub use lifecycle::{Lifecycle, LifecycleState};
pub use runtime::RuntimeConfig;
