//! Thread - Thread control block
//!
//! The record the kernel keeps per thread, stored in the thread table and
//! only touched with the scheduling lock held.

use alloc::sync::Arc;
use core::fmt;

use arrayvec::ArrayVec;

use super::stack::{Stack, DEFAULT_STACK_SIZE};
use super::state::{validate_transition, ThreadState};
use crate::config::MAX_NESTED_SYNCHRONIZERS;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::criterion::{Criterion, Rank};
use crate::sync::SyncId;
use crate::time::{AlarmId, Tick};

/// Thread handle (index into the thread table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(usize);

impl ThreadId {
    pub const fn from_raw(index: usize) -> Self {
        Self(index)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadConfig {
    /// READY, SUSPENDED, or RUNNING (boot threads only)
    pub state: ThreadState,
    pub criterion: Criterion,
    /// `None` uses the kernel default
    pub stack_size: Option<usize>,
}

impl ThreadConfig {
    pub const fn new(criterion: Criterion) -> Self {
        Self {
            state: ThreadState::Ready,
            criterion,
            stack_size: None,
        }
    }

    pub const fn suspended(mut self) -> Self {
        self.state = ThreadState::Suspended;
        self
    }

    pub const fn with_state(mut self, state: ThreadState) -> Self {
        self.state = state;
        self
    }

    pub const fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn stack_size_or_default(&self, default: usize) -> usize {
        self.stack_size.unwrap_or(if default == 0 {
            DEFAULT_STACK_SIZE
        } else {
            default
        })
    }
}

/// Per-thread execution statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStats {
    /// Times the thread was switched in
    pub dispatches: u64,
    /// Ticks spent running
    pub execution_ticks: Tick,
}

/// One synchronizer held by a thread under a priority inversion protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elevation {
    pub synchronizer: SyncId,
    /// Rank this synchronizer elevated the thread to, if it did
    pub rank: Option<Rank>,
}

/// Bounded stack of protocol-managed synchronizers held by a thread
#[derive(Debug, Default, Clone)]
pub struct SynchList {
    entries: ArrayVec<Elevation, MAX_NESTED_SYNCHRONIZERS>,
}

impl SynchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new acquisition
    pub fn push(&mut self, thread: ThreadId, synchronizer: SyncId) -> SchedulerResult<()> {
        self.entries
            .try_push(Elevation {
                synchronizer,
                rank: None,
            })
            .map_err(|_| SchedulerError::NestingTooDeep {
                thread,
                max: MAX_NESTED_SYNCHRONIZERS,
            })
    }

    /// Mark the entry of `synchronizer` as elevating to `rank`
    ///
    /// An entry elevated before keeps the more urgent of both ranks. Returns
    /// `false` when the thread holds no such entry.
    pub fn elevate(&mut self, synchronizer: SyncId, rank: Rank) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.synchronizer == synchronizer)
        else {
            return false;
        };
        entry.rank = Some(entry.rank.map_or(rank, |r| r.min(rank)));
        true
    }

    /// Drop the most recent entry of `synchronizer`
    ///
    /// Returns the entry and whether it was on top of the stack.
    pub fn remove(&mut self, synchronizer: SyncId) -> Option<(Elevation, bool)> {
        let pos = self
            .entries
            .iter()
            .rposition(|e| e.synchronizer == synchronizer)?;
        let was_top = pos + 1 == self.entries.len();
        Some((self.entries.remove(pos), was_top))
    }

    /// Most urgent rank among active elevations
    pub fn effective(&self) -> Option<Rank> {
        self.entries.iter().filter_map(|e| e.rank).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Elevation> {
        self.entries.iter()
    }
}

/// Thread control block
pub struct Thread<C> {
    id: ThreadId,
    state: ThreadState,
    pub(crate) criterion: Criterion,
    pub(crate) stack: Stack,
    pub(crate) context: Arc<C>,
    /// Synchronizer whose wait queue holds the thread
    pub(crate) waiting: Option<SyncId>,
    /// Thread blocked in `join` on this one
    pub(crate) joining: Option<ThreadId>,
    /// Thread this one is blocked joining
    pub(crate) joined: Option<ThreadId>,
    /// Tick of the last dispatch-in
    pub(crate) exec_start: Tick,
    pub(crate) synch_list: SynchList,
    pub(crate) stats: ThreadStats,
    /// Release alarm of a periodic thread
    pub(crate) alarm: Option<AlarmId>,
}

impl<C> Thread<C> {
    pub(crate) fn new(
        id: ThreadId,
        state: ThreadState,
        criterion: Criterion,
        stack: Stack,
        context: Arc<C>,
    ) -> Self {
        Self {
            id,
            state,
            criterion,
            stack,
            context,
            waiting: None,
            joining: None,
            joined: None,
            exec_start: 0,
            synch_list: SynchList::new(),
            stats: ThreadStats::default(),
            alarm: None,
        }
    }

    /// Get thread ID
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Get thread state
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Move to `to`; illegal transitions are fatal
    pub(crate) fn set_state(&mut self, to: ThreadState) {
        crate::sched_assert!(
            validate_transition(self.state, to),
            "{}",
            SchedulerError::InvalidStateTransition {
                thread: self.id,
                from: self.state,
                to,
            }
        );
        self.state = to;
    }

    pub fn criterion(&self) -> &Criterion {
        &self.criterion
    }

    /// Get live rank
    pub fn rank(&self) -> Rank {
        self.criterion.rank()
    }

    pub fn stats(&self) -> ThreadStats {
        self.stats
    }

    pub fn exit_status(&self) -> i32 {
        self.stack.exit_status()
    }
}

impl<C> fmt::Debug for Thread<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("criterion", &self.criterion)
            .field("waiting", &self.waiting)
            .field("joining", &self.joining)
            .finish()
    }
}
