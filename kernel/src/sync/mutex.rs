//! Blocking mutex
//!
//! Waiters sleep in rank order. With a protocol other than `None` the
//! holder is elevated while more urgent threads wait for it.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use super::synchronizer::SyncRecord;
use super::{Protocol, SyncId};
use crate::arch::{atomic, Platform};
use crate::scheduler::core::affinity::CpuMask;
use crate::scheduler::kernel::Kernel;

pub struct Mutex<P: Platform> {
    kernel: Arc<Kernel<P>>,
    id: SyncId,
}

impl<P: Platform> Mutex<P> {
    /// Unlocked mutex using the kernel's default protocol
    pub fn new(kernel: &Arc<Kernel<P>>) -> Self {
        Self::with_protocol(kernel, kernel.config().protocol)
    }

    pub fn with_protocol(kernel: &Arc<Kernel<P>>, protocol: Protocol) -> Self {
        let id = kernel.create_synchronizer(SyncRecord::mutex(protocol));
        Self {
            kernel: Arc::clone(kernel),
            id,
        }
    }

    pub fn id(&self) -> SyncId {
        self.id
    }

    pub fn lock(&self) {
        log::trace!("[SYNC] Mutex::lock({})", self.id);
        let kernel = &self.kernel;
        let mut guard = kernel.lock();
        if atomic::tsl(guard.synchronizer(self.id).lock_flag()) {
            guard = kernel.elevate_holders(guard, self.id);
            guard = kernel.sleep(guard, self.id);
        }
        kernel.insert_holder(&mut guard, self.id);
    }

    /// Hand the mutex to the most urgent waiter, or free it
    pub fn unlock(&self) {
        log::trace!("[SYNC] Mutex::unlock({})", self.id);
        let kernel = &self.kernel;
        let mut guard = kernel.lock();
        let lowered = kernel.restore_holder(&mut guard, self.id);
        let mut mask = if lowered {
            CpuMask::single(kernel.platform().id())
        } else {
            CpuMask::empty()
        };

        match guard.wake_one(self.id) {
            Some(thread) => mask = mask.union(&guard.targets_of(thread)),
            None => guard
                .synchronizer(self.id)
                .lock_flag()
                .store(false, Ordering::Release),
        }
        drop(kernel.preempt(guard, mask));
    }

    pub fn is_locked(&self) -> bool {
        self.kernel
            .lock()
            .synchronizer(self.id)
            .lock_flag()
            .load(Ordering::Acquire)
    }
}

impl<P: Platform> Drop for Mutex<P> {
    fn drop(&mut self) {
        self.kernel.destroy_synchronizer(self.id);
    }
}
