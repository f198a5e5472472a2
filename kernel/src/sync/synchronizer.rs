//! Synchronizer records and the priority inversion protocols
//!
//! Each synchronizer owns a wait queue, its resource word and the table of
//! threads currently holding it. Holders are only registered while a
//! protocol is active.
//!
//! # Protocol bookkeeping
//! - Acquiring pushes an entry on the holder's `SynchList`
//! - A blocked acquirer elevates every holder less urgent than itself and
//!   marks the holder's entry with the elevation rank
//! - Releasing pops the entry; the live rank becomes the most urgent rank
//!   still marked, or the frozen base when nothing is left

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicIsize};

use super::{Protocol, SyncId};
use crate::arch::Platform;
use crate::scheduler::core::affinity::CpuMask;
use crate::scheduler::core::lock::SchedGuard;
use crate::scheduler::criterion::CEILING;
use crate::scheduler::kernel::{Kernel, KernelState};
use crate::scheduler::queue::OrderedQueue;
use crate::scheduler::thread::ThreadId;

/// Resource word of a synchronizer
#[derive(Debug)]
pub(crate) enum Resource {
    /// Mutex: set while locked
    Lock(AtomicBool),
    /// Semaphore: negative values count sleepers
    Count(AtomicIsize),
    /// Condition: no memory
    Signal,
}

#[derive(Debug)]
pub(crate) struct SyncRecord {
    pub(crate) queue: OrderedQueue,
    holders: Box<[Option<ThreadId>]>,
    protocol: Protocol,
    resource: Resource,
}

impl SyncRecord {
    fn new(resource: Resource, capacity: usize, protocol: Protocol) -> Self {
        let capacity = if protocol == Protocol::None { 0 } else { capacity };
        Self {
            queue: OrderedQueue::new(),
            holders: alloc::vec![None; capacity].into_boxed_slice(),
            protocol,
            resource,
        }
    }

    pub(crate) fn mutex(protocol: Protocol) -> Self {
        Self::new(Resource::Lock(AtomicBool::new(false)), 1, protocol)
    }

    pub(crate) fn semaphore(value: isize, protocol: Protocol) -> Self {
        Self::new(
            Resource::Count(AtomicIsize::new(value)),
            value.max(0) as usize,
            protocol,
        )
    }

    pub(crate) fn condition() -> Self {
        Self::new(Resource::Signal, 0, Protocol::None)
    }

    pub(crate) fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub(crate) fn lock_flag(&self) -> &AtomicBool {
        match &self.resource {
            Resource::Lock(flag) => flag,
            other => crate::sched_fatal!("{:?} used as a mutex", other),
        }
    }

    pub(crate) fn counter(&self) -> &AtomicIsize {
        match &self.resource {
            Resource::Count(counter) => counter,
            other => crate::sched_fatal!("{:?} used as a semaphore", other),
        }
    }

    /// Record `thread` as a holder; `false` when every slot is taken
    pub(crate) fn register(&mut self, thread: ThreadId) -> bool {
        match self.holders.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(thread);
                true
            }
            None => false,
        }
    }

    /// Forget one holding of `thread`
    pub(crate) fn unregister(&mut self, thread: ThreadId) -> bool {
        match self.holders.iter_mut().find(|slot| **slot == Some(thread)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Take `thread` out of the wait queue, handing back the unit its
    /// semaphore down consumed
    pub(crate) fn cancel_wait(&mut self, thread: ThreadId) {
        if !self.queue.remove(thread) {
            return;
        }
        if let Resource::Count(counter) = &self.resource {
            crate::arch::atomic::finc(counter);
        }
    }

    pub(crate) fn holders(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.holders.iter().flatten().copied()
    }
}

impl<C> KernelState<C> {
    /// Drop `thread`'s entry for `sync` and recompute its live rank
    ///
    /// Returns whether the entry was on top of the stack, `None` when the
    /// thread had no entry.
    pub(crate) fn drop_elevation(&mut self, thread: ThreadId, sync: SyncId) -> Option<bool> {
        let (entry, was_top) = self.threads[thread].synch_list.remove(sync)?;
        if entry.rank.is_some() {
            match self.threads[thread].synch_list.effective() {
                Some(rank) => self.requeue(thread, |c| c.apply_new_priority(rank)),
                None => self.requeue(thread, |c| c.restore_priority()),
            }
            log::trace!(
                "[SYNC] {} left {}: rank now {}",
                thread,
                sync,
                self.threads[thread].rank()
            );
        }
        Some(was_top)
    }
}

impl<P: Platform> Kernel<P> {
    pub(crate) fn create_synchronizer(&self, record: SyncRecord) -> SyncId {
        let mut guard = self.lock();
        let id = SyncId::from_raw(guard.synchronizers.insert(record));
        log::trace!("[SYNC] created {}", id);
        id
    }

    /// Tear down a synchronizer: waiters are released, holders restored
    pub(crate) fn destroy_synchronizer(&self, id: SyncId) {
        let mut guard = self.lock();
        if !guard.synchronizers.contains(id.as_raw()) {
            return;
        }

        let mut mask = CpuMask::empty();
        while let Some(thread) = guard.wake_one(id) {
            log::warn!("[SYNC] {} destroyed while {} waits on it", id, thread);
            mask = mask.union(&guard.targets_of(thread));
        }

        let holders: Vec<ThreadId> = guard.synchronizer(id).holders().collect();
        for holder in holders {
            if guard.threads.contains(holder) {
                guard.drop_elevation(holder, id);
            }
        }
        guard.synchronizers.remove(id.as_raw());
        log::trace!("[SYNC] destroyed {}", id);

        drop(self.preempt(guard, mask));
    }

    /// Register the running thread as a holder of `id`
    pub(crate) fn insert_holder(&self, state: &mut KernelState<P::Context>, id: SyncId) {
        if state.synchronizer(id).protocol() == Protocol::None {
            return;
        }
        let me = state.running_on(self.platform().id());
        if !state.synchronizer_mut(id).register(me) {
            log::trace!("[SYNC] {}: no holder slot left for {}", id, me);
            return;
        }
        if let Err(err) = state.threads[me].synch_list.push(me, id) {
            crate::sched_fatal!("{}", err);
        }
    }

    /// Elevate the holders of `id` before the running thread blocks on it
    pub(crate) fn elevate_holders<'a>(&'a self, mut guard: SchedGuard<'a, P>, id: SyncId) -> SchedGuard<'a, P> {
        let protocol = guard.synchronizer(id).protocol();
        if protocol == Protocol::None {
            return guard;
        }
        let cpu = self.platform().id();
        let me = guard.running_on(cpu);
        let my_rank = guard.threads[me].rank();
        let target = match protocol {
            Protocol::Ceiling => CEILING,
            _ => my_rank,
        };

        let holders: Vec<ThreadId> = guard.synchronizer(id).holders().collect();
        let mut mask = CpuMask::empty();
        for holder in holders {
            if holder == me {
                continue;
            }
            let criterion = guard.threads[holder].criterion;
            if my_rank < criterion.rank() {
                if !guard.threads[holder].synch_list.elevate(id, target) {
                    continue;
                }
                let rank = guard.threads[holder]
                    .synch_list
                    .effective()
                    .unwrap_or(target);
                guard.requeue(holder, |c| c.apply_new_priority(rank));
                log::debug!(
                    "[SYNC] {} blocked on {}: {} elevated to {}",
                    me,
                    id,
                    holder,
                    guard.threads[holder].criterion
                );
                mask = mask.union(&guard.targets_of(holder));
            } else if criterion.protocol_applied() && my_rank < criterion.frozen() {
                // Already elevated through another synchronizer: keep the
                // entry marked so releasing that one first stays safe
                guard.threads[holder].synch_list.elevate(id, target);
            }
        }

        // The caller is about to block; only remote cores need a nudge
        mask.clear(cpu);
        self.reschedule_mask(guard, mask)
    }

    /// Unregister the running thread from `id` and undo its elevation
    ///
    /// Returns whether the thread's live rank changed.
    pub(crate) fn restore_holder(&self, state: &mut KernelState<P::Context>, id: SyncId) -> bool {
        if state.synchronizer(id).protocol() == Protocol::None {
            return false;
        }
        let me = state.running_on(self.platform().id());
        if !state.synchronizer_mut(id).unregister(me) {
            return false;
        }
        let before = state.threads[me].rank();
        match state.drop_elevation(me, id) {
            Some(true) => {}
            Some(false) => log::warn!(
                "[SYNC] {} released {} out of acquisition order",
                me,
                id
            ),
            None => log::warn!("[SYNC] {} held {} without an entry", me, id),
        }
        state.threads[me].rank() != before
    }

    /// Remove `thread` from every holder table (exit, destroy)
    pub(crate) fn purge_holder(&self, state: &mut KernelState<P::Context>, thread: ThreadId) {
        let held: Vec<SyncId> = state.threads[thread]
            .synch_list
            .iter()
            .map(|e| e.synchronizer)
            .collect();
        for sync in held {
            if let Some(record) = state.synchronizers.get_mut(sync.as_raw()) {
                record.unregister(thread);
            }
            state.drop_elevation(thread, sync);
        }
    }

    /// Semaphore down on a held lock; may block
    pub(crate) fn semaphore_p<'a>(&'a self, mut guard: SchedGuard<'a, P>, id: SyncId) -> SchedGuard<'a, P> {
        if crate::arch::atomic::fdec(guard.synchronizer(id).counter()) < 1 {
            guard = self.elevate_holders(guard, id);
            guard = self.sleep(guard, id);
        }
        self.insert_holder(&mut guard, id);
        guard
    }

    /// Semaphore up on a held lock
    pub(crate) fn semaphore_v<'a>(&'a self, mut guard: SchedGuard<'a, P>, id: SyncId) -> SchedGuard<'a, P> {
        let lowered = self.restore_holder(&mut guard, id);
        let mut mask = if lowered {
            CpuMask::single(self.platform().id())
        } else {
            CpuMask::empty()
        };
        if crate::arch::atomic::finc(guard.synchronizer(id).counter()) < 0 {
            if let Some(thread) = guard.wake_one(id) {
                mask = mask.union(&guard.targets_of(thread));
            }
        }
        self.preempt(guard, mask)
    }
}
