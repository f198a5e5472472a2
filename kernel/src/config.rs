//! Kernel configuration
//!
//! System-wide scheduling traits. Checked once by `Kernel::new`; nothing
//! here changes after boot.

use crate::scheduler::core::affinity::MAX_CPUS;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::criterion::Policy;
use crate::scheduler::thread::stack::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
use crate::sync::Protocol;
use crate::time::Microsecond;

/// Deepest nesting of protocol-managed synchronizers one thread may hold
pub const MAX_NESTED_SYNCHRONIZERS: usize = 8;

/// Default time slice (10ms)
pub const DEFAULT_QUANTUM: Microsecond = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Scheduling policy for every thread
    pub policy: Policy,
    /// Time slice for timed policies
    pub quantum: Microsecond,
    /// Stack size used when a thread configuration does not give one
    pub stack_size: usize,
    /// Default priority inversion protocol of mutexes and semaphores
    pub protocol: Protocol,
    /// Reboot when the last application thread exits (halt otherwise)
    pub reboot: bool,
}

impl KernelConfig {
    pub const fn new(policy: Policy) -> Self {
        Self {
            policy,
            quantum: DEFAULT_QUANTUM,
            stack_size: DEFAULT_STACK_SIZE,
            protocol: Protocol::None,
            reboot: true,
        }
    }

    pub const fn with_quantum(mut self, quantum: Microsecond) -> Self {
        self.quantum = quantum;
        self
    }

    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub const fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub const fn with_reboot(mut self, reboot: bool) -> Self {
        self.reboot = reboot;
        self
    }

    /// Check the configuration against a machine with `cores` cores
    pub fn validate(&self, cores: usize) -> SchedulerResult<()> {
        if cores == 0 {
            return Err(SchedulerError::InvalidConfiguration {
                reason: "platform reports no cores",
            });
        }
        if cores > MAX_CPUS {
            return Err(SchedulerError::InvalidConfiguration {
                reason: "more cores than a CpuMask can describe",
            });
        }
        if self.policy.timed() && self.quantum == 0 {
            return Err(SchedulerError::InvalidConfiguration {
                reason: "time-sliced policy needs a non-zero quantum",
            });
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(SchedulerError::InvalidConfiguration {
                reason: "stack size below MIN_STACK_SIZE",
            });
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new(Policy::Priority)
    }
}
