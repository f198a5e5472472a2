//! Thread operations
//!
//! Lifecycle (create, join, exit, destroy), voluntary scheduling (pass,
//! yield, suspend, resume), criterion changes, and the sleep/wakeup pair
//! synchronizers block through.
//!
//! Every path that takes the running thread off its core calls `leave`
//! before touching a queue, so execution time and LLF laxity are charged
//! exactly once per stint.

use alloc::sync::Arc;

use crate::arch::Platform;
use crate::scheduler::core::affinity::CpuMask;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::core::lock::SchedGuard;
use crate::scheduler::criterion::Criterion;
use crate::scheduler::kernel::Kernel;
use crate::scheduler::thread::{ThreadConfig, ThreadId, ThreadState};
use crate::sync::SyncId;

impl<P: Platform> Kernel<P> {
    /// Create a thread running `entry`; its return value is the exit status
    ///
    /// The configuration must ask for READY or SUSPENDED and carry a
    /// criterion of the system policy.
    pub fn create_thread<F>(self: &Arc<Self>, config: ThreadConfig, entry: F) -> SchedulerResult<ThreadId>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        crate::sched_assert!(
            config.state.is_initial(),
            "threads cannot be created {}",
            config.state
        );
        let found = config.criterion.policy();
        if found != self.config().policy {
            return Err(crate::sched_error!(SchedulerError::PolicyMismatch {
                expected: self.config().policy,
                found,
            }));
        }
        Ok(self.spawn(config, entry))
    }

    /// Wait for `thread` to finish and return its exit status
    ///
    /// Joining oneself, or a thread somebody else already joins, is fatal.
    /// A thread destroyed while joined yields `ThreadNotFound`.
    pub fn join(&self, thread: ThreadId) -> SchedulerResult<i32> {
        let mut guard = self.lock();
        let cpu = self.platform().id();
        let me = guard.running_on(cpu);

        let Some(target) = guard.threads.get(thread) else {
            return Err(crate::sched_error!(SchedulerError::ThreadNotFound { thread }));
        };
        crate::sched_assert!(thread != me, "thread {} joins itself", me);
        crate::sched_assert!(
            target.joining.is_none(),
            "thread {} is already joined",
            thread
        );

        if target.state() != ThreadState::Finishing {
            log::debug!("[SCHED] {} joins {}", me, thread);
            guard.threads[thread].joining = Some(me);
            guard.threads[me].joined = Some(thread);
            let now = self.platform().elapsed();
            self.leave(&mut guard, me, now);
            let state = &mut *guard;
            state.scheduler.suspend(&state.threads, me);
            state.threads[me].set_state(ThreadState::Suspended);
            let next = guard.running_on(cpu);
            guard = self.dispatch(guard, me, next, true);
        }

        guard
            .threads
            .get(thread)
            .map(|t| t.exit_status())
            .ok_or(SchedulerError::ThreadNotFound { thread })
    }

    /// Hand the core to `thread`, which must be ready on this core's list
    pub fn pass(&self, thread: ThreadId) {
        let mut guard = self.lock();
        let cpu = self.platform().id();
        let me = guard.running_on(cpu);

        match guard.threads.get(thread).map(|t| t.state()) {
            Some(ThreadState::Ready) => {}
            Some(state) => {
                log::warn!("[SCHED] pass({}) ignored: thread is {}", thread, state);
                return;
            }
            None => {
                log::warn!("[SCHED] pass({}) ignored: no such thread", thread);
                return;
            }
        }

        let now = self.platform().elapsed();
        self.leave(&mut guard, me, now);
        let state = &mut *guard;
        match state.scheduler.choose_thread(&state.threads, cpu, thread) {
            Some(next) => drop(self.dispatch(guard, me, next, false)),
            None => log::warn!("[SCHED] pass({}) ignored: not in core {}'s list", thread, cpu),
        }
    }

    /// Give the core to the next thread in line, even a less urgent one
    pub fn yield_now(&self) {
        let mut guard = self.lock();
        let cpu = self.platform().id();
        let me = guard.running_on(cpu);
        let now = self.platform().elapsed();
        self.leave(&mut guard, me, now);
        let state = &mut *guard;
        let next = state.scheduler.choose_another(&state.threads, cpu).unwrap_or(me);
        drop(self.dispatch(guard, me, next, true));
    }

    /// Take `thread` out of scheduling until `resume`
    ///
    /// Waiting and finishing threads, and threads running on another core,
    /// are left alone with a warning.
    pub fn suspend(&self, thread: ThreadId) {
        let mut guard = self.lock();
        let cpu = self.platform().id();

        let Some(state) = guard.threads.get(thread).map(|t| t.state()) else {
            log::warn!("[SCHED] suspend({}) ignored: no such thread", thread);
            return;
        };

        match state {
            ThreadState::Running if guard.scheduler.core_of(thread) == Some(cpu) => {
                log::debug!("[SCHED] {} suspends itself", thread);
                let now = self.platform().elapsed();
                self.leave(&mut guard, thread, now);
                let st = &mut *guard;
                st.scheduler.suspend(&st.threads, thread);
                st.threads[thread].set_state(ThreadState::Suspended);
                let next = guard.running_on(cpu);
                drop(self.dispatch(guard, thread, next, true));
            }
            ThreadState::Ready => {
                let st = &mut *guard;
                st.scheduler.suspend(&st.threads, thread);
                st.threads[thread].set_state(ThreadState::Suspended);
                log::debug!("[SCHED] {} suspended", thread);
            }
            ThreadState::Running => {
                log::warn!(
                    "[SCHED] suspend({}) ignored: running on another core",
                    thread
                );
            }
            other => {
                log::warn!("[SCHED] suspend({}) ignored: thread is {}", thread, other);
            }
        }
    }

    /// Make a suspended thread ready again
    pub fn resume(&self, thread: ThreadId) {
        let mut guard = self.lock();
        match guard.threads.get(thread).map(|t| t.state()) {
            Some(ThreadState::Suspended) => {}
            Some(state) => {
                log::warn!("[SCHED] resume({}) ignored: thread is {}", thread, state);
                return;
            }
            None => {
                log::warn!("[SCHED] resume({}) ignored: no such thread", thread);
                return;
            }
        }

        let st = &mut *guard;
        st.threads[thread].set_state(ThreadState::Ready);
        st.scheduler.resume(&st.threads, thread);
        log::debug!("[SCHED] {} resumed", thread);
        let mask = guard.targets_of(thread);
        drop(self.preempt(guard, mask));
    }

    /// Finish the calling thread with `status`
    pub fn exit(&self, status: i32) -> ! {
        let mut guard = self.lock();
        let cpu = self.platform().id();
        let me = guard.running_on(cpu);
        let now = self.platform().elapsed();
        self.leave(&mut guard, me, now);

        let state = &mut *guard;
        state.scheduler.remove(&state.threads, me);
        let thread = &mut state.threads[me];
        thread.set_state(ThreadState::Finishing);
        thread.stack.set_exit_status(status);
        let alarm = thread.alarm.take();
        state.thread_count -= 1;
        log::debug!("[SCHED] {} exits with status {}", me, status);

        self.purge_holder(state, me);
        if let Some(alarm) = alarm {
            self.release_alarm(state, alarm);
        }
        if let Some(joiner) = state.wake_joiner(me) {
            // The local choice below covers this core
            let mut mask = state.targets_of(joiner);
            mask.clear(cpu);
            guard = self.preempt(guard, mask);
        }

        let state = &mut *guard;
        let next = state.scheduler.choose(&state.threads, cpu).unwrap_or(me);
        drop(self.dispatch(guard, me, next, true));
        crate::sched_fatal!("finished thread {} was dispatched again", me)
    }

    /// Reclaim a thread that is not running
    pub fn destroy(&self, thread: ThreadId) -> SchedulerResult<()> {
        let mut guard = self.lock();
        let Some(state) = guard.threads.get(thread).map(|t| t.state()) else {
            return Err(crate::sched_error!(SchedulerError::ThreadNotFound { thread }));
        };
        crate::sched_assert!(
            state != ThreadState::Running,
            "thread {} destroyed while running",
            thread
        );

        let st = &mut *guard;
        match state {
            ThreadState::Ready => {
                st.scheduler.remove(&st.threads, thread);
                st.thread_count -= 1;
            }
            ThreadState::Waiting => {
                if let Some(sync) = st.threads[thread].waiting.take() {
                    st.synchronizer_mut(sync).cancel_wait(thread);
                }
                st.thread_count -= 1;
            }
            ThreadState::Suspended => st.thread_count -= 1,
            ThreadState::Running | ThreadState::Finishing => {}
        }

        self.purge_holder(st, thread);
        st.forget_join(thread);
        if let Some(alarm) = st.threads[thread].alarm.take() {
            self.release_alarm(st, alarm);
        }
        let joiner = st.wake_joiner(thread);
        if let Some(removed) = st.threads.remove(thread) {
            self.platform().release_context(&removed.context);
        }
        log::debug!("[SCHED] {} destroyed ({})", thread, state);

        if let Some(joiner) = joiner {
            let mask = guard.targets_of(joiner);
            guard = self.preempt(guard, mask);
        }
        drop(guard);
        Ok(())
    }

    /// Replace `thread`'s criterion
    ///
    /// An ongoing priority-protocol elevation survives and is undone onto
    /// the new criterion.
    pub fn set_priority(&self, thread: ThreadId, criterion: Criterion) -> SchedulerResult<()> {
        let found = criterion.policy();
        if found != self.config().policy {
            return Err(crate::sched_error!(SchedulerError::PolicyMismatch {
                expected: self.config().policy,
                found,
            }));
        }

        let mut guard = self.lock();
        if !guard.threads.contains(thread) {
            return Err(crate::sched_error!(SchedulerError::ThreadNotFound { thread }));
        }

        let before = guard.targets_of(thread);
        guard.requeue(thread, |c| c.reassign(criterion));
        if found.partitioned() && guard.threads[thread].criterion.queue().is_none() {
            let cpu = guard.next_queue;
            guard.next_queue = (cpu + 1) % self.cores();
            guard.requeue(thread, |c| c.set_queue(cpu));
        }
        log::debug!(
            "[SCHED] {} criterion -> {}",
            thread,
            guard.threads[thread].criterion
        );

        let mask = before.union(&guard.targets_of(thread));
        drop(self.preempt(guard, mask));
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // Blocking
    // ═══════════════════════════════════════════════════════════════

    /// Block the running thread in `sync`'s wait queue
    pub(crate) fn sleep<'a>(&'a self, mut guard: SchedGuard<'a, P>, sync: SyncId) -> SchedGuard<'a, P> {
        let cpu = self.platform().id();
        let me = guard.running_on(cpu);
        let now = self.platform().elapsed();
        self.leave(&mut guard, me, now);

        let state = &mut *guard;
        state.scheduler.suspend(&state.threads, me);
        let thread = &mut state.threads[me];
        thread.set_state(ThreadState::Waiting);
        thread.waiting = Some(sync);
        let rank = thread.rank();
        state.synchronizer_mut(sync).queue.insert(me, rank);
        log::trace!("[SYNC] {} sleeps on {}", me, sync);

        let next = guard.running_on(cpu);
        self.dispatch(guard, me, next, true)
    }

    /// Wake the most urgent waiter of `sync`
    pub(crate) fn wakeup<'a>(&'a self, mut guard: SchedGuard<'a, P>, sync: SyncId) -> SchedGuard<'a, P> {
        match guard.wake_one(sync) {
            Some(thread) => {
                let mask = guard.targets_of(thread);
                self.preempt(guard, mask)
            }
            None => guard,
        }
    }

    /// Wake every waiter of `sync`
    pub(crate) fn wakeup_all<'a>(&'a self, mut guard: SchedGuard<'a, P>, sync: SyncId) -> SchedGuard<'a, P> {
        let mut mask = CpuMask::empty();
        while let Some(thread) = guard.wake_one(sync) {
            mask = mask.union(&guard.targets_of(thread));
        }
        self.preempt(guard, mask)
    }
}
