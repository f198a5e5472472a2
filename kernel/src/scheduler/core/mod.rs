//! Scheduler core module
//!
//! Ready queues, CPU masks, errors and the scheduling lock.

pub mod affinity;
pub mod error;
pub mod lock;
pub mod scheduler;

pub use affinity::{CpuMask, MAX_CPUS};
pub use error::{SchedulerError, SchedulerResult};
pub use lock::SchedGuard;
pub use scheduler::{Schedulables, Scheduler};
