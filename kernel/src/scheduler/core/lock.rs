//! Scheduling lock
//!
//! Acquisition disables local interrupts, then takes the kernel spinlock.
//! Dropping the guard releases the spinlock first and re-enables interrupts
//! afterwards, unless the kernel is still booting.
//!
//! Internal primitives that need the lock take a `SchedGuard` (or the
//! state behind it) instead of asserting that some global lock is held.

use core::ops::{Deref, DerefMut};

use spin::MutexGuard;

use crate::arch::Platform;
use crate::scheduler::kernel::KernelState;

/// Re-enables local interrupts when dropped
struct IrqRestore<'a, P: Platform> {
    cpu: &'a P,
    enable: bool,
}

impl<'a, P: Platform> IrqRestore<'a, P> {
    /// Leave interrupts disabled on drop
    fn keep_disabled(mut self) {
        self.enable = false;
    }
}

impl<'a, P: Platform> Drop for IrqRestore<'a, P> {
    fn drop(&mut self) {
        if self.enable {
            self.cpu.int_enable();
        }
    }
}

/// Held scheduling lock
///
/// Field order matters: the spinlock guard drops before interrupts are
/// restored.
pub struct SchedGuard<'a, P: Platform> {
    state: MutexGuard<'a, KernelState<P::Context>>,
    irq: IrqRestore<'a, P>,
}

impl<'a, P: Platform> SchedGuard<'a, P> {
    pub(crate) fn new(
        state: MutexGuard<'a, KernelState<P::Context>>,
        cpu: &'a P,
        restore_interrupts: bool,
    ) -> Self {
        Self {
            state,
            irq: IrqRestore {
                cpu,
                enable: restore_interrupts,
            },
        }
    }

    /// Release the spinlock but keep local interrupts disabled
    ///
    /// Used right before a context switch: the next thread re-acquires the
    /// lock itself, or enables interrupts when it starts for the first time.
    /// Returns whether interrupts were to be restored, so the switched-out
    /// thread can re-acquire the lock with the same obligation.
    pub(crate) fn release_for_switch(self) -> bool {
        let SchedGuard { state, irq } = self;
        let restore = irq.enable;
        drop(state);
        irq.keep_disabled();
        restore
    }
}

impl<'a, P: Platform> Deref for SchedGuard<'a, P> {
    type Target = KernelState<P::Context>;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<'a, P: Platform> DerefMut for SchedGuard<'a, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}
