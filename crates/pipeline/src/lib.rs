//! Job orchestration: worker supervision, frame relays and the lifecycle
//! controller that ties them to job state.

pub mod config;
pub mod lifecycle;
pub mod relay;
pub mod store;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use lifecycle::{LifecycleController, LifecycleError};
pub use store::{JobStore, MemoryJobStore};
pub use supervisor::{StopOutcome, Supervisor, SupervisorError, WorkerHandle};
