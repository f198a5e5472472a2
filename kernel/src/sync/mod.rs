//! Blocking synchronizers
//!
//! Mutexes, counting semaphores and condition variables whose waiters sleep
//! in rank order inside the kernel. Mutexes and semaphores can run a
//! priority inversion protocol over their holders.

pub mod condition;
pub mod mutex;
pub mod semaphore;
pub(crate) mod synchronizer;

pub use condition::Condition;
pub use mutex::Mutex;
pub use semaphore::Semaphore;

use core::fmt;

/// Synchronizer handle (index into the kernel's synchronizer table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncId(usize);

impl SyncId {
    pub const fn from_raw(index: usize) -> Self {
        Self(index)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Priority inversion protocol of a synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// Holders keep their rank
    #[default]
    None,
    /// Holders of a contended synchronizer run at `CEILING`
    Ceiling,
    /// Holders inherit the rank of the most urgent blocked thread
    Inheritance,
}
