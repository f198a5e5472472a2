//! Real-time criteria (RM, DM, EDF, LLF, partitioned LLF)

use super::{Criterion, Policy, Rank, APERIODIC, NORMAL, PERIODIC};
use crate::arch::CpuId;
use crate::time::{Microsecond, Tick, TimeBase};

/// Job parameters in time-base ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtParams {
    /// Relative deadline
    pub deadline: Tick,
    pub period: Tick,
    /// Worst-case execution time
    pub capacity: Tick,
}

impl RtParams {
    /// Convert microsecond parameters once; a zero deadline means "same as period"
    pub fn new(
        time: &dyn TimeBase,
        deadline: Microsecond,
        period: Microsecond,
        capacity: Microsecond,
    ) -> Self {
        let deadline = if deadline == 0 { period } else { deadline };
        Self {
            deadline: time.ticks(deadline),
            period: time.ticks(period),
            capacity: time.ticks(capacity),
        }
    }

    /// EDF rank for a job released at `now`
    pub fn absolute_deadline(&self, now: Tick) -> Rank {
        in_band(now as i128 + self.deadline as i128)
    }

    /// LLF rank for a job released at `now`
    pub fn absolute_laxity(&self, now: Tick) -> Rank {
        in_band(now as i128 + self.deadline as i128 - self.capacity as i128)
    }
}

/// Clamp a computed rank into `[PERIODIC, APERIODIC)`
pub(super) fn in_band(value: i128) -> Rank {
    value.clamp(PERIODIC as i128, (APERIODIC - 1) as i128) as Rank
}

fn static_rank(ticks: Tick) -> Rank {
    in_band(ticks as i128)
}

impl Criterion {
    fn with_params(policy: Policy, rank: Rank, params: RtParams) -> Self {
        let mut criterion = Criterion::new(policy, rank);
        criterion.params = Some(params);
        criterion
    }

    /// Rate monotonic: shorter period is more urgent
    pub fn rate_monotonic(
        time: &dyn TimeBase,
        deadline: Microsecond,
        period: Microsecond,
        capacity: Microsecond,
    ) -> Self {
        let params = RtParams::new(time, deadline, period, capacity);
        let rank = if params.period == 0 {
            static_rank(params.deadline)
        } else {
            static_rank(params.period)
        };
        Self::with_params(Policy::RateMonotonic, rank, params)
    }

    /// Deadline monotonic: shorter relative deadline is more urgent
    pub fn deadline_monotonic(
        time: &dyn TimeBase,
        deadline: Microsecond,
        period: Microsecond,
        capacity: Microsecond,
    ) -> Self {
        let params = RtParams::new(time, deadline, period, capacity);
        Self::with_params(
            Policy::DeadlineMonotonic,
            static_rank(params.deadline),
            params,
        )
    }

    /// Earliest deadline first, ranked as if released at tick 0
    pub fn edf(
        time: &dyn TimeBase,
        deadline: Microsecond,
        period: Microsecond,
        capacity: Microsecond,
    ) -> Self {
        let params = RtParams::new(time, deadline, period, capacity);
        Self::with_params(Policy::Edf, params.absolute_deadline(0), params)
    }

    /// Least laxity first (global), ranked as if released at tick 0
    pub fn llf(
        time: &dyn TimeBase,
        deadline: Microsecond,
        period: Microsecond,
        capacity: Microsecond,
    ) -> Self {
        let params = RtParams::new(time, deadline, period, capacity);
        Self::with_params(Policy::Llf, params.absolute_laxity(0), params)
    }

    /// Least laxity first on one core's queue
    ///
    /// With `cpu == None` the kernel assigns a queue round-robin when the
    /// thread is created.
    pub fn partitioned_llf(
        time: &dyn TimeBase,
        deadline: Microsecond,
        period: Microsecond,
        capacity: Microsecond,
        cpu: Option<CpuId>,
    ) -> Self {
        let params = RtParams::new(time, deadline, period, capacity);
        let mut criterion =
            Self::with_params(Policy::PartitionedLlf, params.absolute_laxity(0), params);
        criterion.queue = cpu;
        criterion
    }

    /// Periodic criterion for whatever `policy` the system runs
    ///
    /// Non real-time policies have no notion of deadlines; their periodic
    /// threads run at `NORMAL`.
    pub fn periodic(
        policy: Policy,
        time: &dyn TimeBase,
        deadline: Microsecond,
        period: Microsecond,
        capacity: Microsecond,
    ) -> Self {
        match policy {
            Policy::RateMonotonic => Self::rate_monotonic(time, deadline, period, capacity),
            Policy::DeadlineMonotonic => {
                Self::deadline_monotonic(time, deadline, period, capacity)
            }
            Policy::Edf => Self::edf(time, deadline, period, capacity),
            Policy::Llf => Self::llf(time, deadline, period, capacity),
            Policy::PartitionedLlf => {
                Self::partitioned_llf(time, deadline, period, capacity, None)
            }
            Policy::Fcfs => Self::fcfs(time),
            Policy::Priority | Policy::RoundRobin => Criterion::new(policy, NORMAL),
        }
    }
}
