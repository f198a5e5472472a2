//! Scheduler subsystem
//!
//! Criteria and ready queues, the thread table, and the kernel that
//! dispatches threads over the cores of a `Platform`.

pub mod core;
pub mod criterion;
pub mod idle;
pub mod kernel;
pub mod queue;
pub mod thread;

// Re-exports
pub use self::core::affinity::CpuMask;
pub use self::core::error::{SchedulerError, SchedulerResult};
pub use criterion::{Criterion, Event, Policy, PolicyTraits, Rank, RtParams};
pub use kernel::{Kernel, ThreadInfo};
pub use thread::{RtConfig, ThreadConfig, ThreadId, ThreadState, ThreadStats};
