//! Kernel - scheduling state and the dispatch path
//!
//! One `Kernel` per machine. Everything mutable lives in `KernelState`
//! behind a single spinlock; primitives that may switch context take the
//! held `SchedGuard` by value and hand back a fresh one once the calling
//! thread runs again.
//!
//! # Boot
//! `init` builds MAIN and one idle thread per core, `start` loads the first
//! contexts. `boot` does both.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::ops::{Index, IndexMut};
use core::sync::atomic::{AtomicBool, Ordering};

use slab::Slab;
use spin::Mutex;

use crate::arch::{ContextEntry, CpuId, Interrupt, Platform};
use crate::config::KernelConfig;
use crate::scheduler::core::affinity::CpuMask;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::core::lock::SchedGuard;
use crate::scheduler::core::scheduler::{Schedulables, Scheduler};
use crate::scheduler::criterion::{Criterion, Event, Rank, MAIN};
use crate::scheduler::thread::{
    Stack, Thread, ThreadConfig, ThreadId, ThreadState, ThreadStats,
};
use crate::sync::synchronizer::SyncRecord;
use crate::sync::SyncId;
use crate::time::{Alarm, AlarmId, JobStats, Tick};

/// Thread control blocks indexed by `ThreadId`
pub struct ThreadTable<C> {
    slots: Slab<Thread<C>>,
}

impl<C> ThreadTable<C> {
    fn new() -> Self {
        Self { slots: Slab::new() }
    }

    /// Insert a thread built for the id it will get
    pub(crate) fn insert_with(&mut self, make: impl FnOnce(ThreadId) -> Thread<C>) -> ThreadId {
        let entry = self.slots.vacant_entry();
        let id = ThreadId::from_raw(entry.key());
        entry.insert(make(id));
        id
    }

    pub(crate) fn remove(&mut self, id: ThreadId) -> Option<Thread<C>> {
        self.slots.try_remove(id.as_raw())
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread<C>> {
        self.slots.get(id.as_raw())
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.slots.contains(id.as_raw())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread<C>> {
        self.slots.iter().map(|(_, thread)| thread)
    }
}

impl<C> Index<ThreadId> for ThreadTable<C> {
    type Output = Thread<C>;

    fn index(&self, id: ThreadId) -> &Thread<C> {
        match self.slots.get(id.as_raw()) {
            Some(thread) => thread,
            None => crate::sched_fatal!("{}", SchedulerError::ThreadNotFound { thread: id }),
        }
    }
}

impl<C> IndexMut<ThreadId> for ThreadTable<C> {
    fn index_mut(&mut self, id: ThreadId) -> &mut Thread<C> {
        match self.slots.get_mut(id.as_raw()) {
            Some(thread) => thread,
            None => crate::sched_fatal!("{}", SchedulerError::ThreadNotFound { thread: id }),
        }
    }
}

impl<C> Schedulables for ThreadTable<C> {
    fn rank_of(&self, thread: ThreadId) -> Rank {
        self[thread].rank()
    }

    fn queue_of(&self, thread: ThreadId) -> usize {
        self[thread].criterion.queue_index()
    }
}

/// Everything guarded by the scheduling lock
pub struct KernelState<C> {
    pub(crate) threads: ThreadTable<C>,
    pub(crate) scheduler: Scheduler,
    pub(crate) synchronizers: Slab<SyncRecord>,
    pub(crate) alarms: Slab<Alarm>,
    /// Remaining time-slice ticks per core
    pub(crate) slices: Vec<Tick>,
    /// Next core queue handed to a partitioned thread without one
    pub(crate) next_queue: CpuId,
    /// Threads not yet finished, idle threads included
    pub(crate) thread_count: usize,
}

impl<C> KernelState<C> {
    /// Thread chosen on `cpu`; a core without one is a corrupted scheduler
    pub(crate) fn running_on(&self, cpu: CpuId) -> ThreadId {
        match self.scheduler.chosen(cpu) {
            Some(thread) => thread,
            None => crate::sched_fatal!("core {} has no running thread", cpu),
        }
    }

    pub(crate) fn synchronizer(&self, id: SyncId) -> &SyncRecord {
        match self.synchronizers.get(id.as_raw()) {
            Some(record) => record,
            None => crate::sched_fatal!(
                "{}",
                SchedulerError::SynchronizerNotFound { synchronizer: id }
            ),
        }
    }

    pub(crate) fn synchronizer_mut(&mut self, id: SyncId) -> &mut SyncRecord {
        match self.synchronizers.get_mut(id.as_raw()) {
            Some(record) => record,
            None => crate::sched_fatal!(
                "{}",
                SchedulerError::SynchronizerNotFound { synchronizer: id }
            ),
        }
    }

    /// Cores that may have to reconsider their choice because of `thread`
    pub(crate) fn targets_of(&self, thread: ThreadId) -> CpuMask {
        let criterion = &self.threads[thread].criterion;
        if criterion.policy().partitioned() {
            CpuMask::single(criterion.queue_index())
        } else {
            CpuMask::first_n(self.scheduler.cores())
        }
    }

    /// Change a thread's criterion, keeping every queue it sits in ordered
    pub(crate) fn requeue(&mut self, thread: ThreadId, change: impl FnOnce(&mut Criterion)) {
        match self.threads[thread].state() {
            ThreadState::Ready => {
                self.scheduler.remove(&self.threads, thread);
                change(&mut self.threads[thread].criterion);
                self.scheduler.insert(&self.threads, thread);
            }
            ThreadState::Waiting => {
                change(&mut self.threads[thread].criterion);
                let rank = self.threads[thread].rank();
                if let Some(sync) = self.threads[thread].waiting {
                    let queue = &mut self.synchronizer_mut(sync).queue;
                    if queue.remove(thread) {
                        queue.insert(thread, rank);
                    }
                }
            }
            ThreadState::Running | ThreadState::Suspended => {
                change(&mut self.threads[thread].criterion);
            }
            ThreadState::Finishing => {}
        }
    }

    /// Move the head of `sync`'s wait queue back to the ready queue
    pub(crate) fn wake_one(&mut self, sync: SyncId) -> Option<ThreadId> {
        let thread = self.synchronizer_mut(sync).queue.pop_front()?;
        let t = &mut self.threads[thread];
        t.set_state(ThreadState::Ready);
        t.waiting = None;
        self.scheduler.resume(&self.threads, thread);
        log::trace!("[SYNC] {} woke {}", sync, thread);
        Some(thread)
    }

    /// Ready the thread joining `thread`, if it is still parked
    pub(crate) fn wake_joiner(&mut self, thread: ThreadId) -> Option<ThreadId> {
        let joiner = self.threads[thread].joining.take()?;
        match self.threads.get(joiner).map(|t| (t.state(), t.joined)) {
            Some((ThreadState::Suspended, Some(target))) if target == thread => {
                let t = &mut self.threads[joiner];
                t.joined = None;
                t.set_state(ThreadState::Ready);
                self.scheduler.resume(&self.threads, joiner);
                Some(joiner)
            }
            _ => None,
        }
    }

    /// Withdraw `thread` from the `join` it is parked in
    pub(crate) fn forget_join(&mut self, thread: ThreadId) {
        let Some(target) = self.threads[thread].joined.take() else {
            return;
        };
        if self.threads.contains(target) && self.threads[target].joining == Some(thread) {
            self.threads[target].joining = None;
        }
    }
}

/// Per-thread view returned by `Kernel::snapshot`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub state: ThreadState,
    pub criterion: Criterion,
    pub stats: ThreadStats,
    pub waiting: Option<SyncId>,
    /// Protocol-managed synchronizers held
    pub held: usize,
}

pub struct Kernel<P: Platform> {
    platform: P,
    config: KernelConfig,
    cores: usize,
    quantum: Tick,
    state: Mutex<KernelState<P::Context>>,
    /// Set once the first contexts are loaded
    started: AtomicBool,
}

impl<P: Platform> Kernel<P> {
    /// Build the kernel for `platform`; nothing runs until `boot`
    pub fn new(platform: P, config: KernelConfig) -> SchedulerResult<Arc<Self>> {
        let cores = platform.cores();
        config.validate(cores).map_err(|err| crate::sched_error!(err))?;

        let quantum = if config.policy.timed() {
            platform.ticks(config.quantum).max(1)
        } else {
            0
        };
        log::info!(
            "[SCHED] {} cores, policy {}, quantum {} ticks, protocol {:?}",
            cores,
            config.policy,
            quantum,
            config.protocol
        );

        let state = KernelState {
            threads: ThreadTable::new(),
            scheduler: Scheduler::new(config.policy.queues(cores), cores),
            synchronizers: Slab::new(),
            alarms: Slab::new(),
            slices: alloc::vec![quantum; cores],
            next_queue: 0,
            thread_count: 0,
        };

        Ok(Arc::new(Self {
            platform,
            config,
            cores,
            quantum,
            state: Mutex::new(state),
            started: AtomicBool::new(false),
        }))
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    pub fn is_booting(&self) -> bool {
        !self.started.load(Ordering::Acquire)
    }

    // ═══════════════════════════════════════════════════════════════
    // Locking and dispatch
    // ═══════════════════════════════════════════════════════════════

    /// Disable local interrupts and take the scheduling lock
    pub(crate) fn lock(&self) -> SchedGuard<'_, P> {
        let restore = self.platform.int_enabled() && !self.is_booting();
        self.platform.int_disable();
        SchedGuard::new(self.state.lock(), &self.platform, restore)
    }

    /// Run `prev`'s share of the bookkeeping when it stops running
    pub(crate) fn leave(&self, state: &mut KernelState<P::Context>, prev: ThreadId, now: Tick) {
        let thread = &mut state.threads[prev];
        thread.stats.execution_ticks += now.saturating_sub(thread.exec_start);
        let exec_start = thread.exec_start;
        thread.criterion.update(Event::Leave { exec_start }, now);
        thread.exec_start = now;
    }

    /// Switch the executing core from `prev` to `next`
    ///
    /// `next` must already be the chosen thread of this core. Returns when
    /// `prev` runs again, with the lock re-acquired.
    pub(crate) fn dispatch<'a>(
        &'a self,
        mut guard: SchedGuard<'a, P>,
        prev: ThreadId,
        next: ThreadId,
        charge: bool,
    ) -> SchedGuard<'a, P> {
        let cpu = self.platform.id();
        if charge && self.config.policy.timed() {
            guard.slices[cpu] = self.quantum;
        }
        if prev == next {
            return guard;
        }

        let now = self.platform.elapsed();
        let state = &mut *guard;
        if state.threads[prev].state() == ThreadState::Running {
            state.threads[prev].set_state(ThreadState::Ready);
        }
        let incoming = &mut state.threads[next];
        incoming.set_state(ThreadState::Running);
        incoming.stats.dispatches += 1;
        incoming.exec_start = now;
        incoming.criterion.update(Event::Scheduled, now);

        log::trace!("[SCHED] core {}: {} -> {}", cpu, prev, next);

        let from = Arc::clone(&state.threads[prev].context);
        let to = Arc::clone(&state.threads[next].context);
        let restore = guard.release_for_switch();
        self.platform.switch_context(&from, &to);

        SchedGuard::new(self.state.lock(), &self.platform, restore)
    }

    /// Re-evaluate the choice of the executing core
    pub(crate) fn reschedule_local<'a>(&'a self, mut guard: SchedGuard<'a, P>) -> SchedGuard<'a, P> {
        let cpu = self.platform.id();
        let prev = guard.running_on(cpu);
        let now = self.platform.elapsed();
        self.leave(&mut guard, prev, now);
        let state = &mut *guard;
        let next = state.scheduler.choose(&state.threads, cpu).unwrap_or(prev);
        self.dispatch(guard, prev, next, true)
    }

    /// Reschedule every core in `mask`: remote ones by IPI, this one directly
    pub(crate) fn reschedule_mask<'a>(
        &'a self,
        guard: SchedGuard<'a, P>,
        mask: CpuMask,
    ) -> SchedGuard<'a, P> {
        if self.is_booting() {
            return guard;
        }
        let cpu = self.platform.id();
        for other in mask.iter().filter(|&c| c != cpu && c < self.cores) {
            self.platform.send_ipi(other, Interrupt::Reschedule);
        }
        if mask.is_set(cpu) {
            self.reschedule_local(guard)
        } else {
            guard
        }
    }

    /// Reschedule `mask` if the policy preempts on arrivals
    pub(crate) fn preempt<'a>(&'a self, guard: SchedGuard<'a, P>, mask: CpuMask) -> SchedGuard<'a, P> {
        if self.config.policy.preemptive() && !mask.is_empty() {
            self.reschedule_mask(guard, mask)
        } else {
            guard
        }
    }

    pub(crate) fn reschedule_all_cpus<'a>(&'a self, guard: SchedGuard<'a, P>) -> SchedGuard<'a, P> {
        self.reschedule_mask(guard, CpuMask::first_n(self.cores))
    }

    /// Let the executing core pick again
    pub fn reschedule(&self) {
        let guard = self.lock();
        drop(self.reschedule_local(guard));
    }

    // ═══════════════════════════════════════════════════════════════
    // Interrupts
    // ═══════════════════════════════════════════════════════════════

    fn handle_interrupt(&self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::Timer => self.timer_interrupt(),
            Interrupt::Reschedule => self.rescheduler(),
        }
    }

    /// Timer tick: job releases on core 0, then time slicing
    fn timer_interrupt(&self) {
        if self.is_booting() {
            return;
        }
        let cpu = self.platform.id();
        let mut guard = self.lock();
        if cpu == 0 {
            guard = self.release_jobs(guard);
        }
        if self.config.policy.timed() {
            guard = self.time_slicer(guard, cpu);
        }
        drop(guard);
    }

    fn time_slicer<'a>(&'a self, mut guard: SchedGuard<'a, P>, cpu: CpuId) -> SchedGuard<'a, P> {
        let slice = &mut guard.slices[cpu];
        *slice = slice.saturating_sub(1);
        if *slice == 0 {
            log::trace!("[SCHED] core {}: quantum expired", cpu);
            self.reschedule_local(guard)
        } else {
            guard
        }
    }

    /// Reschedule IPI handler
    fn rescheduler(&self) {
        if self.is_booting() {
            return;
        }
        let guard = self.lock();
        drop(self.reschedule_local(guard));
    }

    // ═══════════════════════════════════════════════════════════════
    // Thread creation and boot
    // ═══════════════════════════════════════════════════════════════

    /// Build a thread without validating the configuration
    pub(crate) fn spawn<F>(self: &Arc<Self>, config: ThreadConfig, entry: F) -> ThreadId
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let mut stack = Stack::new(config.stack_size_or_default(self.config.stack_size));
        let kernel = Arc::downgrade(self);
        let trampoline: ContextEntry = Box::new(move || {
            let Some(kernel) = Weak::upgrade(&kernel) else {
                return;
            };
            kernel.thread_prologue();
            let status = entry();
            kernel.exit(status)
        });
        let context = Arc::new(self.platform.init_context(&mut stack, trampoline));

        let mut criterion = config.criterion;
        let mut guard = self.lock();
        if criterion.policy().partitioned() && criterion.queue().is_none() {
            criterion.set_queue(guard.next_queue);
            guard.next_queue = (guard.next_queue + 1) % self.cores;
        }

        let state = &mut *guard;
        let id = state
            .threads
            .insert_with(|id| Thread::new(id, config.state, criterion, stack, context));
        state.thread_count += 1;
        log::debug!("[SCHED] created {} {} {}", id, config.state, criterion);

        if config.state == ThreadState::Ready {
            state.scheduler.insert(&state.threads, id);
            let mask = guard.targets_of(id);
            guard = self.preempt(guard, mask);
        }
        drop(guard);
        id
    }

    /// First code run by every new thread
    fn thread_prologue(&self) {
        self.platform.int_enable();
    }

    /// Install handlers, MAIN and the idle threads
    pub fn init<F>(self: &Arc<Self>, main: F) -> SchedulerResult<ThreadId>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        if !self.state.lock().threads.is_empty() {
            return Err(crate::sched_error!(SchedulerError::InvalidConfiguration {
                reason: "kernel already initialised",
            }));
        }
        self.platform.int_disable();

        for interrupt in [Interrupt::Timer, Interrupt::Reschedule] {
            let kernel = Arc::downgrade(self);
            self.platform.install_handler(
                interrupt,
                Arc::new(move |irq| {
                    if let Some(kernel) = kernel.upgrade() {
                        kernel.handle_interrupt(irq);
                    }
                }),
            );
            self.platform.enable(interrupt);
        }

        let policy = self.config.policy;
        let main_id = self.spawn(
            ThreadConfig::new(Criterion::new(policy, MAIN).on(0)).with_state(ThreadState::Running),
            main,
        );
        self.state.lock().scheduler.set_chosen(0, main_id);

        for cpu in 0..self.cores {
            let state = if cpu == 0 {
                ThreadState::Ready
            } else {
                ThreadState::Running
            };
            let kernel = Arc::downgrade(self);
            let idle = self.spawn(
                ThreadConfig::new(Criterion::idle(policy, cpu)).with_state(state),
                move || match kernel.upgrade() {
                    Some(kernel) => kernel.idle(),
                    None => 0,
                },
            );
            if cpu != 0 {
                self.state.lock().scheduler.set_chosen(cpu, idle);
            }
        }

        log::info!("[SCHED] initialised: MAIN is {}", main_id);
        Ok(main_id)
    }

    /// Load the first context of every core
    ///
    /// Secondary cores go first; core 0 never comes back on hardware.
    pub fn start(&self) {
        self.platform.int_disable();
        let now = self.platform.elapsed();
        let first: Vec<(CpuId, Arc<P::Context>)> = {
            let mut state = self.state.lock();
            let state = &mut *state;
            (0..self.cores)
                .filter_map(|cpu| {
                    let thread = state.scheduler.chosen(cpu)?;
                    let t = &mut state.threads[thread];
                    t.exec_start = now;
                    t.stats.dispatches += 1;
                    Some((cpu, Arc::clone(&t.context)))
                })
                .collect()
        };
        if first.len() != self.cores {
            log::error!("[SCHED] start() before init()");
            return;
        }

        self.started.store(true, Ordering::Release);
        log::info!("[SCHED] starting {} cores", self.cores);
        for (cpu, context) in first.iter().skip(1) {
            self.platform.load_context(*cpu, context);
        }
        self.platform.load_context(0, &first[0].1);
    }

    /// `init` then `start`
    pub fn boot<F>(self: &Arc<Self>, main: F) -> SchedulerResult<()>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        self.init(main)?;
        self.start();
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════

    /// Thread executing the caller
    pub fn running(&self) -> ThreadId {
        let guard = self.lock();
        guard.running_on(self.platform.id())
    }

    /// Thread chosen on `cpu`
    pub fn running_on(&self, cpu: CpuId) -> Option<ThreadId> {
        self.lock().scheduler.chosen(cpu)
    }

    /// Unfinished threads, idle threads included
    pub fn thread_count(&self) -> usize {
        self.lock().thread_count
    }

    pub fn state(&self, thread: ThreadId) -> Option<ThreadState> {
        self.lock().threads.get(thread).map(Thread::state)
    }

    pub fn criterion(&self, thread: ThreadId) -> Option<Criterion> {
        self.lock().threads.get(thread).map(|t| t.criterion)
    }

    /// Live rank of `thread`
    pub fn priority(&self, thread: ThreadId) -> Option<Rank> {
        self.lock().threads.get(thread).map(Thread::rank)
    }

    pub fn stats(&self, thread: ThreadId) -> Option<ThreadStats> {
        self.lock().threads.get(thread).map(Thread::stats)
    }

    /// Protocol-managed synchronizers `thread` currently holds
    pub fn held_synchronizers(&self, thread: ThreadId) -> usize {
        self.lock()
            .threads
            .get(thread)
            .map_or(0, |t| t.synch_list.len())
    }

    /// Release accounting of a periodic thread
    pub fn job_stats(&self, thread: ThreadId) -> Option<JobStats> {
        let guard = self.lock();
        let alarm: AlarmId = guard.threads.get(thread)?.alarm?;
        guard.alarms.get(alarm.as_raw()).map(|a| a.stats)
    }

    pub fn snapshot(&self) -> Vec<ThreadInfo> {
        let guard = self.lock();
        guard
            .threads
            .iter()
            .map(|t| ThreadInfo {
                id: t.id(),
                state: t.state(),
                criterion: t.criterion,
                stats: t.stats,
                waiting: t.waiting,
                held: t.synch_list.len(),
            })
            .collect()
    }
}
