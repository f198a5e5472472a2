//! Release alarms of periodic threads
//!
//! An alarm fires once per period from the timer interrupt on core 0. The
//! kernel turns each firing into a job release: the thread's criterion gets
//! `PERIOD_START` and its job semaphore is signalled.

use core::fmt;

use super::Tick;
use crate::scheduler::thread::ThreadId;
use crate::sync::SyncId;

/// Releases left for an alarm without an iteration bound
pub const UNBOUNDED: u64 = u64::MAX;

/// Alarm handle (index into the alarm table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(usize);

impl AlarmId {
    pub const fn from_raw(index: usize) -> Self {
        Self(index)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Job accounting of a periodic thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    /// Jobs released by the alarm (the first job is not counted)
    pub released: u64,
    /// Releases that found the previous job still running
    pub missed: u64,
}

#[derive(Debug)]
pub struct Alarm {
    pub(crate) thread: ThreadId,
    pub(crate) semaphore: SyncId,
    period: Tick,
    next: Tick,
    releases_left: u64,
    /// Jobs the thread may still start through `wait_next`
    pub(crate) jobs_left: u64,
    pub(crate) stats: JobStats,
}

impl Alarm {
    /// Alarm releasing `releases` jobs every `period`, the first at `first`
    pub fn new(
        thread: ThreadId,
        semaphore: SyncId,
        period: Tick,
        first: Tick,
        releases: u64,
    ) -> Self {
        Self {
            thread,
            semaphore,
            period: period.max(1),
            next: first,
            releases_left: releases,
            jobs_left: releases,
            stats: JobStats::default(),
        }
    }

    /// Tick of the next release
    pub fn next_release(&self) -> Tick {
        self.next
    }

    pub fn period(&self) -> Tick {
        self.period
    }

    /// Fire if a release is due at `now`, advancing to the next period
    ///
    /// At most one release per call; a late timer catches up one tick at a
    /// time.
    pub fn expire(&mut self, now: Tick) -> bool {
        if self.releases_left == 0 || now < self.next {
            return false;
        }
        self.next += self.period;
        if self.releases_left != UNBOUNDED {
            self.releases_left -= 1;
        }
        self.stats.released += 1;
        true
    }
}
