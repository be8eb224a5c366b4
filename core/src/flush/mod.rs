pub mod policy;
pub mod registry;
pub mod scheduler;

pub use policy::FlushThresholdPolicy;
pub use registry::{FlushWorkerId, FlushWorkerRegistry, RunningWorkers};
pub use scheduler::{FlushScheduler, MemoryWaiter};
