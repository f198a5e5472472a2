//! Scheduling criteria
//!
//! A criterion is the rank a thread carries in the ready queue and in wait
//! queues. The system runs one `Policy`; every thread's criterion is built
//! for that policy.
//!
//! - Priority: static rank, elevation hooks only
//! - RoundRobin: Priority plus a time-slice timer
//! - Fcfs: rank is the arrival tick, never preempts
//! - RateMonotonic / DeadlineMonotonic: static rank from period / deadline
//! - Edf: absolute deadline, recomputed at every period start
//! - Llf / PartitionedLlf: absolute deadline minus remaining capacity
//!
//! Lower rank is more urgent. Computed real-time ranks live strictly inside
//! `[PERIODIC, APERIODIC)`; everything outside that band is a sentinel and is
//! never touched by `update`.

mod realtime;

pub use realtime::RtParams;

use core::fmt;

use bitflags::bitflags;

use crate::arch::CpuId;
use crate::time::{Tick, TimeBase};

/// Orderable scheduling value (lower = more urgent)
pub type Rank = i64;

/// Most urgent rank, reserved for priority ceiling elevation
pub const CEILING: Rank = Rank::MIN;
/// Interrupt service threads
pub const ISR: Rank = -1000;
/// Application entry thread
pub const MAIN: Rank = -1;
pub const HIGH: Rank = 0;
pub const NORMAL: Rank = (1 << 62) - 1;
pub const LOW: Rank = Rank::MAX - 1;
/// Per-core idle threads
pub const IDLE: Rank = Rank::MAX;

/// Lower bound of the computed real-time band
pub const PERIODIC: Rank = HIGH;
/// Upper bound (exclusive) of the computed real-time band
pub const APERIODIC: Rank = NORMAL;
pub const SPORADIC: Rank = NORMAL;

bitflags! {
    /// Compile-time properties of a policy
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PolicyTraits: u8 {
        /// A time-slice timer is armed
        const TIMED       = 1 << 0;
        /// Ranks change with time
        const DYNAMIC     = 1 << 1;
        /// A more urgent arrival preempts the running thread
        const PREEMPTIVE  = 1 << 2;
        /// One ready queue per core
        const PARTITIONED = 1 << 3;
    }
}

/// System-wide scheduling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    Priority,
    RoundRobin,
    Fcfs,
    RateMonotonic,
    DeadlineMonotonic,
    Edf,
    Llf,
    PartitionedLlf,
}

impl Policy {
    pub const fn traits(self) -> PolicyTraits {
        match self {
            Self::Priority | Self::RateMonotonic | Self::DeadlineMonotonic => {
                PolicyTraits::PREEMPTIVE
            }
            Self::RoundRobin => PolicyTraits::TIMED.union(PolicyTraits::PREEMPTIVE),
            Self::Fcfs => PolicyTraits::empty(),
            Self::Edf | Self::Llf => PolicyTraits::TIMED
                .union(PolicyTraits::DYNAMIC)
                .union(PolicyTraits::PREEMPTIVE),
            Self::PartitionedLlf => PolicyTraits::TIMED
                .union(PolicyTraits::DYNAMIC)
                .union(PolicyTraits::PREEMPTIVE)
                .union(PolicyTraits::PARTITIONED),
        }
    }

    #[inline]
    pub fn timed(self) -> bool {
        self.traits().contains(PolicyTraits::TIMED)
    }

    #[inline]
    pub fn dynamic(self) -> bool {
        self.traits().contains(PolicyTraits::DYNAMIC)
    }

    #[inline]
    pub fn preemptive(self) -> bool {
        self.traits().contains(PolicyTraits::PREEMPTIVE)
    }

    #[inline]
    pub fn partitioned(self) -> bool {
        self.traits().contains(PolicyTraits::PARTITIONED)
    }

    /// Number of ready queues for `cores` cores
    pub fn queues(self, cores: usize) -> usize {
        if self.partitioned() {
            cores
        } else {
            1
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Priority => "Priority",
            Self::RoundRobin => "RR",
            Self::Fcfs => "FCFS",
            Self::RateMonotonic => "RM",
            Self::DeadlineMonotonic => "DM",
            Self::Edf => "EDF",
            Self::Llf => "LLF",
            Self::PartitionedLlf => "PLLF",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rank recomputation triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A new job was released
    PeriodStart,
    /// The thread stops running; `exec_start` is its last dispatch tick
    Leave { exec_start: Tick },
    /// The thread starts running
    Scheduled,
}

/// A thread's scheduling rank and the state of any elevation applied to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Criterion {
    policy: Policy,
    priority: Rank,
    frozen: Rank,
    protocol_applied: bool,
    params: Option<RtParams>,
    queue: Option<CpuId>,
}

impl Criterion {
    /// Static (or aperiodic) criterion with an explicit rank
    pub const fn new(policy: Policy, rank: Rank) -> Self {
        Self {
            policy,
            priority: rank,
            frozen: rank,
            protocol_applied: false,
            params: None,
            queue: None,
        }
    }

    /// First-come first-served: rank is the arrival tick
    pub fn fcfs(time: &dyn TimeBase) -> Self {
        let arrival = Rank::try_from(time.elapsed()).unwrap_or(NORMAL);
        Self::new(Policy::Fcfs, arrival.clamp(PERIODIC, APERIODIC - 1))
    }

    /// Idle thread of `cpu`
    pub const fn idle(policy: Policy, cpu: CpuId) -> Self {
        let mut criterion = Self::new(policy, IDLE);
        criterion.queue = Some(cpu);
        criterion
    }

    /// Pin the criterion to a core's queue (partitioned policies)
    pub const fn on(mut self, cpu: CpuId) -> Self {
        self.queue = Some(cpu);
        self
    }

    #[inline]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Live rank used for queue placement
    #[inline]
    pub fn rank(&self) -> Rank {
        self.priority
    }

    /// Rank restored when the current elevation ends
    #[inline]
    pub fn frozen(&self) -> Rank {
        self.frozen
    }

    #[inline]
    pub fn protocol_applied(&self) -> bool {
        self.protocol_applied
    }

    pub fn params(&self) -> Option<RtParams> {
        self.params
    }

    /// Assigned core queue, if any
    pub fn queue(&self) -> Option<CpuId> {
        self.queue
    }

    pub(crate) fn set_queue(&mut self, cpu: CpuId) {
        self.queue = Some(cpu);
    }

    pub fn is_idle(&self) -> bool {
        self.priority == IDLE
    }

    /// Index of the ready queue this criterion belongs to
    pub fn queue_index(&self) -> usize {
        if self.policy.partitioned() {
            self.queue.unwrap_or(0)
        } else {
            0
        }
    }

    /// Elevate to `rank`, freezing the base rank on the first elevation
    pub fn apply_new_priority(&mut self, rank: Rank) {
        if !self.protocol_applied {
            self.frozen = self.priority;
            self.protocol_applied = true;
        }
        self.priority = rank;
    }

    /// End the elevation episode
    pub fn restore_priority(&mut self) {
        if self.protocol_applied {
            self.priority = self.frozen;
            self.protocol_applied = false;
        }
    }

    /// Replace the criterion, keeping an ongoing elevation on top of it
    pub fn reassign(&mut self, mut next: Criterion) {
        if next.queue.is_none() && next.policy == self.policy {
            next.queue = self.queue;
        }
        if self.protocol_applied {
            let elevated = self.priority;
            *self = next;
            self.frozen = next.priority;
            self.priority = elevated;
            self.protocol_applied = true;
        } else {
            *self = next;
        }
    }

    /// Recompute the rank for `event` at tick `now`
    ///
    /// Under elevation the frozen rank is updated instead of the live one.
    /// Values outside `[PERIODIC, APERIODIC)` are sentinels and are left
    /// alone. Returns whether a rank changed.
    pub fn update(&mut self, event: Event, now: Tick) -> bool {
        let Some(params) = self.params else {
            return false;
        };
        let current = if self.protocol_applied {
            self.frozen
        } else {
            self.priority
        };
        if !(PERIODIC..APERIODIC).contains(&current) {
            return false;
        }

        let next = match (self.policy, event) {
            (Policy::Edf, Event::PeriodStart) => params.absolute_deadline(now),
            (Policy::Llf | Policy::PartitionedLlf, Event::PeriodStart) => {
                params.absolute_laxity(now)
            }
            (Policy::Llf | Policy::PartitionedLlf, Event::Leave { exec_start }) => {
                realtime::in_band(current as i128 + now.saturating_sub(exec_start) as i128)
            }
            _ => return false,
        };

        if self.protocol_applied {
            self.frozen = next;
        } else {
            self.priority = next;
        }
        next != current
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.priority {
            CEILING => write!(f, "{}(CEILING)", self.policy)?,
            MAIN => write!(f, "{}(MAIN)", self.policy)?,
            IDLE => write!(f, "{}(IDLE)", self.policy)?,
            rank => write!(f, "{}({})", self.policy, rank)?,
        }
        if self.protocol_applied {
            write!(f, " frozen={}", self.frozen)?;
        }
        Ok(())
    }
}
