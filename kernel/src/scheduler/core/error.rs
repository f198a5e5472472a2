//! Scheduler Error Handling
//!
//! Typed errors for the recoverable paths (configuration, lookups) and the
//! assertion macro used for invariant violations, which are fatal.

use core::fmt;

use crate::scheduler::criterion::Policy;
use crate::scheduler::thread::{ThreadId, ThreadState};
use crate::sync::SyncId;

/// Scheduler error types with detailed context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    // ═══════════════════════════════════════════════════════════════
    // Configuration Errors
    // ═══════════════════════════════════════════════════════════════

    /// Kernel configuration rejected at construction
    InvalidConfiguration { reason: &'static str },

    /// Criterion built for another policy than the system runs
    PolicyMismatch { expected: Policy, found: Policy },

    // ═══════════════════════════════════════════════════════════════
    // Thread Errors
    // ═══════════════════════════════════════════════════════════════

    /// Thread not found in the thread table
    ThreadNotFound { thread: ThreadId },

    /// Invalid thread state transition
    InvalidStateTransition {
        thread: ThreadId,
        from: ThreadState,
        to: ThreadState,
    },

    // ═══════════════════════════════════════════════════════════════
    // Synchronizer Errors
    // ═══════════════════════════════════════════════════════════════

    /// Synchronizer not found (already destroyed)
    SynchronizerNotFound { synchronizer: SyncId },

    /// A thread holds more protocol-managed synchronizers than allowed
    NestingTooDeep { thread: ThreadId, max: usize },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration { reason } => {
                write!(f, "Invalid configuration: {}", reason)
            }
            Self::PolicyMismatch { expected, found } => {
                write!(f, "Criterion policy {} does not match system policy {}", found, expected)
            }
            Self::ThreadNotFound { thread } => {
                write!(f, "Thread {} not found", thread)
            }
            Self::InvalidStateTransition { thread, from, to } => {
                write!(f, "Thread {}: invalid transition {} -> {}", thread, from, to)
            }
            Self::SynchronizerNotFound { synchronizer } => {
                write!(f, "Synchronizer {} not found", synchronizer)
            }
            Self::NestingTooDeep { thread, max } => {
                write!(f, "Thread {} exceeds {} nested synchronizers", thread, max)
            }
        }
    }
}

impl SchedulerError {
    /// Get recovery hint for this error
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration { .. } => "Fix the kernel configuration before boot",
            Self::PolicyMismatch { .. } => "Build criteria for the configured policy",
            Self::ThreadNotFound { .. } => "Thread may have already been destroyed",
            Self::InvalidStateTransition { .. } => "Check thread lifecycle management",
            Self::SynchronizerNotFound { .. } => "Synchronizer used after destruction",
            Self::NestingTooDeep { .. } => "Raise MAX_NESTED_SYNCHRONIZERS or flatten lock nesting",
        }
    }

    /// Is this a recoverable error?
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidStateTransition { .. } => false,
            Self::NestingTooDeep { .. } => false,
            _ => true,
        }
    }

    /// Get error severity (0-3)
    pub fn severity(&self) -> u8 {
        match self {
            Self::InvalidStateTransition { .. } => 3, // Critical
            Self::NestingTooDeep { .. } => 3,
            Self::InvalidConfiguration { .. } => 2, // Severe
            Self::PolicyMismatch { .. } => 2,
            Self::SynchronizerNotFound { .. } => 1, // Warning
            Self::ThreadNotFound { .. } => 0,       // Info
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Log a scheduler error with its recovery hint and pass it through
#[macro_export]
macro_rules! sched_error {
    ($err:expr) => {{
        let err = $err;
        log::error!("[SCHED] Error: {} (hint: {})", err, err.recovery_hint());
        err
    }};
}

/// Critical scheduler assertion
///
/// A failed assertion is a caller contract breach; the kernel cannot
/// continue with corrupted queue state.
#[macro_export]
macro_rules! sched_assert {
    ($cond:expr, $($reason:tt)+) => {
        if !$cond {
            $crate::sched_fatal!($($reason)+);
        }
    };
}

/// Unconditional invariant violation (evaluates to `!`)
#[macro_export]
macro_rules! sched_fatal {
    ($($reason:tt)+) => {{
        log::error!("[SCHED CRITICAL] Invariant violated: {}", format_args!($($reason)+));
        panic!("[SCHED CRITICAL] Invariant violated: {}", format_args!($($reason)+))
    }};
}
