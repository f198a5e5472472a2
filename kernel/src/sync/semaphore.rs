//! Counting semaphore
//!
//! `p` takes a unit, sleeping while none is left; `v` gives one back and
//! wakes the most urgent sleeper. A negative value counts the sleepers.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use super::synchronizer::SyncRecord;
use super::{Protocol, SyncId};
use crate::arch::Platform;
use crate::scheduler::kernel::Kernel;

pub struct Semaphore<P: Platform> {
    kernel: Arc<Kernel<P>>,
    id: SyncId,
}

impl<P: Platform> Semaphore<P> {
    pub fn new(kernel: &Arc<Kernel<P>>, value: isize) -> Self {
        Self::with_protocol(kernel, value, kernel.config().protocol)
    }

    pub fn with_protocol(kernel: &Arc<Kernel<P>>, value: isize, protocol: Protocol) -> Self {
        let id = kernel.create_synchronizer(SyncRecord::semaphore(value, protocol));
        Self {
            kernel: Arc::clone(kernel),
            id,
        }
    }

    pub fn id(&self) -> SyncId {
        self.id
    }

    pub fn p(&self) {
        log::trace!("[SYNC] Semaphore::p({})", self.id);
        let guard = self.kernel.lock();
        drop(self.kernel.semaphore_p(guard, self.id));
    }

    pub fn v(&self) {
        log::trace!("[SYNC] Semaphore::v({})", self.id);
        let guard = self.kernel.lock();
        drop(self.kernel.semaphore_v(guard, self.id));
    }

    pub fn value(&self) -> isize {
        self.kernel
            .lock()
            .synchronizer(self.id)
            .counter()
            .load(Ordering::Acquire)
    }
}

impl<P: Platform> Drop for Semaphore<P> {
    fn drop(&mut self) {
        self.kernel.destroy_synchronizer(self.id);
    }
}
