//! State - Thread state machine
//!
//! Legal lifecycle transitions, checked whenever the kernel moves a thread.

use core::fmt;

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Thread is executing on some core
    Running,

    /// Thread is in a ready queue
    Ready,

    /// Thread is out of scheduling consideration (suspended or joining)
    Suspended,

    /// Thread is in a synchronizer's wait queue
    Waiting,

    /// Thread has exited; its status is kept until it is reaped
    Finishing,
}

impl ThreadState {
    /// States an application thread may be created in
    pub fn is_initial(self) -> bool {
        matches!(self, Self::Ready | Self::Suspended)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Ready => write!(f, "READY"),
            Self::Suspended => write!(f, "SUSPENDED"),
            Self::Waiting => write!(f, "WAITING"),
            Self::Finishing => write!(f, "FINISHING"),
        }
    }
}

/// Validate state transition
pub fn validate_transition(from: ThreadState, to: ThreadState) -> bool {
    use ThreadState::*;

    match (from, to) {
        // Dispatch and preemption
        (Ready, Running) => true,
        (Running, Ready) => true,

        // Blocking on a synchronizer
        (Running, Waiting) => true,
        (Waiting, Ready) => true,

        // Suspension (join parks the caller the same way)
        (Running, Suspended) => true,
        (Ready, Suspended) => true,
        (Suspended, Ready) => true,

        // Exit
        (Running, Finishing) => true,

        // All other transitions invalid
        _ => false,
    }
}
