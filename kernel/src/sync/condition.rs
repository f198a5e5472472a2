//! Condition variable
//!
//! No memory: a signal with nobody waiting is lost. Callers re-check their
//! predicate after `wait` returns.

use alloc::sync::Arc;

use super::synchronizer::SyncRecord;
use super::SyncId;
use crate::arch::Platform;
use crate::scheduler::kernel::Kernel;

pub struct Condition<P: Platform> {
    kernel: Arc<Kernel<P>>,
    id: SyncId,
}

impl<P: Platform> Condition<P> {
    pub fn new(kernel: &Arc<Kernel<P>>) -> Self {
        let id = kernel.create_synchronizer(SyncRecord::condition());
        Self {
            kernel: Arc::clone(kernel),
            id,
        }
    }

    pub fn id(&self) -> SyncId {
        self.id
    }

    pub fn wait(&self) {
        let guard = self.kernel.lock();
        drop(self.kernel.sleep(guard, self.id));
    }

    /// Wake the most urgent waiter
    pub fn signal(&self) {
        let guard = self.kernel.lock();
        drop(self.kernel.wakeup(guard, self.id));
    }

    /// Wake every waiter
    pub fn broadcast(&self) {
        let guard = self.kernel.lock();
        drop(self.kernel.wakeup_all(guard, self.id));
    }
}

impl<P: Platform> Drop for Condition<P> {
    fn drop(&mut self) {
        self.kernel.destroy_synchronizer(self.id);
    }
}
