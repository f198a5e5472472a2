//! Periodic threads
//!
//! A periodic thread is an ordinary thread plus a job semaphore and a
//! release alarm. The body runs its first job straight away and calls
//! `wait_next` between jobs; every alarm firing recomputes the thread's
//! criterion for the new period and signals the semaphore.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch::{CpuId, Platform};
use crate::scheduler::core::affinity::CpuMask;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::core::lock::SchedGuard;
use crate::scheduler::criterion::{Criterion, Event};
use crate::scheduler::kernel::{Kernel, KernelState};
use crate::scheduler::thread::{ThreadConfig, ThreadId, ThreadState};
use crate::sync::synchronizer::SyncRecord;
use crate::sync::{Protocol, SyncId};
use crate::time::alarm::UNBOUNDED;
use crate::time::{Alarm, AlarmId, Microsecond};

/// Creation parameters of a periodic thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtConfig {
    pub period: Microsecond,
    /// Relative deadline (0 means the period)
    pub deadline: Microsecond,
    /// Worst-case execution time per job
    pub capacity: Microsecond,
    /// Extra delay before the first alarm release
    pub activation: Microsecond,
    /// Jobs to run, `UNBOUNDED` for no limit
    pub times: u64,
    /// READY or SUSPENDED
    pub state: ThreadState,
    /// Core queue for partitioned policies (`None` picks one)
    pub cpu: Option<CpuId>,
    pub stack_size: Option<usize>,
}

impl RtConfig {
    pub const fn new(period: Microsecond) -> Self {
        Self {
            period,
            deadline: 0,
            capacity: 0,
            activation: 0,
            times: UNBOUNDED,
            state: ThreadState::Ready,
            cpu: None,
            stack_size: None,
        }
    }

    pub const fn with_deadline(mut self, deadline: Microsecond) -> Self {
        self.deadline = deadline;
        self
    }

    pub const fn with_capacity(mut self, capacity: Microsecond) -> Self {
        self.capacity = capacity;
        self
    }

    pub const fn with_activation(mut self, activation: Microsecond) -> Self {
        self.activation = activation;
        self
    }

    pub const fn with_times(mut self, times: u64) -> Self {
        self.times = times;
        self
    }

    pub const fn suspended(mut self) -> Self {
        self.state = ThreadState::Suspended;
        self
    }

    pub const fn on(mut self, cpu: CpuId) -> Self {
        self.cpu = Some(cpu);
        self
    }
}

impl<P: Platform> Kernel<P> {
    /// Create a periodic thread running `entry`
    ///
    /// The first job starts when the thread is first dispatched; the alarm
    /// releases `times - 1` more, the first of them `activation + period`
    /// after creation.
    pub fn create_periodic<F>(self: &Arc<Self>, config: RtConfig, entry: F) -> SchedulerResult<ThreadId>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        if config.period == 0 || self.platform().ticks(config.period) == 0 {
            return Err(crate::sched_error!(SchedulerError::InvalidConfiguration {
                reason: "periodic thread period shorter than one tick",
            }));
        }
        crate::sched_assert!(
            config.state.is_initial(),
            "threads cannot be created {}",
            config.state
        );

        let policy = self.config().policy;
        let mut criterion = Criterion::periodic(
            policy,
            self.platform(),
            config.deadline,
            config.period,
            config.capacity,
        );
        if let Some(cpu) = config.cpu {
            criterion = criterion.on(cpu % self.cores());
        }
        let now = self.platform().elapsed();
        criterion.update(Event::PeriodStart, now);

        let semaphore = {
            let mut guard = self.lock();
            let key = guard
                .synchronizers
                .insert(SyncRecord::semaphore(0, Protocol::None));
            SyncId::from_raw(key)
        };

        let mut thread_config = ThreadConfig::new(criterion).suspended();
        thread_config.stack_size = config.stack_size;
        let thread = self.spawn(thread_config, entry);

        {
            let mut guard = self.lock();
            let period = self.platform().ticks(config.period);
            let first = now + self.platform().ticks(config.activation) + period;
            let releases = if config.times == UNBOUNDED {
                UNBOUNDED
            } else {
                config.times.saturating_sub(1)
            };
            let key = guard
                .alarms
                .insert(Alarm::new(thread, semaphore, period, first, releases));
            guard.threads[thread].alarm = Some(AlarmId::from_raw(key));
            log::debug!(
                "[SCHED] {} periodic: period {} ticks, first release at {}, {} releases",
                thread,
                period,
                first,
                releases
            );
        }

        if config.state == ThreadState::Ready {
            self.resume(thread);
        }
        Ok(thread)
    }

    /// Block until the next job of the calling periodic thread
    ///
    /// Returns `false` once every job has been handed out, or when the
    /// caller is not periodic.
    pub fn wait_next(&self) -> bool {
        let mut guard = self.lock();
        let me = guard.running_on(self.platform().id());
        let Some(alarm) = guard.threads[me].alarm else {
            log::warn!("[SCHED] wait_next() from non-periodic thread {}", me);
            return false;
        };
        let Some(alarm) = guard.alarms.get_mut(alarm.as_raw()) else {
            crate::sched_fatal!("{} lost its alarm {}", me, alarm)
        };
        if alarm.jobs_left == 0 {
            return false;
        }
        if alarm.jobs_left != UNBOUNDED {
            alarm.jobs_left -= 1;
        }
        let semaphore = alarm.semaphore;
        drop(self.semaphore_p(guard, semaphore));
        true
    }

    /// Fire due alarms (timer interrupt, core 0)
    pub(crate) fn release_jobs<'a>(&'a self, mut guard: SchedGuard<'a, P>) -> SchedGuard<'a, P> {
        let now = self.platform().elapsed();
        let state = &mut *guard;

        let mut due: Vec<(usize, ThreadId, SyncId)> = Vec::new();
        for (key, alarm) in state.alarms.iter_mut() {
            if alarm.expire(now) {
                due.push((key, alarm.thread, alarm.semaphore));
            }
        }
        if due.is_empty() {
            return guard;
        }

        let mut mask = CpuMask::empty();
        for (key, thread, semaphore) in due {
            if state.threads[thread].state() != ThreadState::Waiting {
                state.alarms[key].stats.missed += 1;
                log::trace!("[SCHED] {} missed its release at {}", thread, now);
            }
            state.requeue(thread, |c| {
                c.update(Event::PeriodStart, now);
            });
            mask = mask.union(&state.targets_of(thread));

            let counter = state.synchronizer(semaphore).counter();
            if crate::arch::atomic::finc(counter) < 0 {
                if let Some(woken) = state.wake_one(semaphore) {
                    mask = mask.union(&state.targets_of(woken));
                }
            }
        }
        self.preempt(guard, mask)
    }

    /// Drop a finished thread's alarm and job semaphore
    pub(crate) fn release_alarm(&self, state: &mut KernelState<P::Context>, alarm: AlarmId) {
        let Some(alarm) = state.alarms.try_remove(alarm.as_raw()) else {
            return;
        };
        if let Some(record) = state.synchronizers.try_remove(alarm.semaphore.as_raw()) {
            crate::sched_assert!(
                record.queue.is_empty(),
                "job semaphore {} of {} still has waiters",
                alarm.semaphore,
                alarm.thread
            );
        }
        log::trace!(
            "[SCHED] {} released {} jobs, missed {}",
            alarm.thread,
            alarm.stats.released,
            alarm.stats.missed
        );
    }
}
