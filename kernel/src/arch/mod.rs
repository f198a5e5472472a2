//! Architecture abstraction
//!
//! The scheduling core never touches hardware directly. Each target provides
//! one type implementing the traits below; `Platform` is the bundle the
//! kernel is generic over.
//!
//! # Contracts
//! - Interrupt state is per core. `int_disable`/`int_enable` act on the core
//!   executing the call.
//! - An IPI sent with `send_ipi` must end up invoking the handler installed
//!   for that interrupt on the target core, with interrupts disabled.
//! - `switch_context` returns only when some later switch targets `prev`
//!   again, possibly on another core.

pub mod atomic;

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::scheduler::thread::Stack;
use crate::time::TimeBase;

/// Logical core number (0 is the boot core)
pub type CpuId = usize;

/// Interrupts the scheduling core installs handlers for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interrupt {
    /// Inter-processor reschedule request
    Reschedule,
    /// Periodic system timer (one tick of the time base)
    Timer,
}

/// Handler invoked on the interrupted core
pub type InterruptHandler = Arc<dyn Fn(Interrupt) + Send + Sync>;

/// Entry procedure of a freshly created context
pub type ContextEntry = Box<dyn FnOnce() + Send + 'static>;

/// Core control
pub trait Cpu: Send + Sync {
    /// Core executing the caller
    fn id(&self) -> CpuId;

    /// Number of cores taking part in scheduling
    fn cores(&self) -> usize;

    fn int_enable(&self);
    fn int_disable(&self);
    fn int_enabled(&self) -> bool;

    /// Park the core until the next interrupt has been handled
    fn halt(&self);

    /// Restart the machine
    fn reboot(&self) -> !;
}

/// Interrupt controller
pub trait InterruptController: Send + Sync {
    fn install_handler(&self, interrupt: Interrupt, handler: InterruptHandler);
    fn enable(&self, interrupt: Interrupt);
    fn send_ipi(&self, cpu: CpuId, interrupt: Interrupt);
}

/// Register-set save/restore primitive
pub trait ContextSwitch: Send + Sync {
    /// Saved execution state of one thread
    type Context: Send + Sync + 'static;

    /// Prepare a context that starts executing `entry` on `stack`
    fn init_context(&self, stack: &mut Stack, entry: ContextEntry) -> Self::Context;

    /// Save the running state into `prev` and resume `next`
    fn switch_context(&self, prev: &Self::Context, next: &Self::Context);

    /// Start `cpu` on `first`
    ///
    /// On hardware this does not return for the calling core. Hosted
    /// implementations may return once the machine has shut down.
    fn load_context(&self, cpu: CpuId, first: &Self::Context);

    /// The context will never be switched to again
    fn release_context(&self, _context: &Self::Context) {}
}

/// Everything the kernel needs from a target
pub trait Platform: Cpu + InterruptController + ContextSwitch + TimeBase + 'static {}

impl<T> Platform for T where T: Cpu + InterruptController + ContextSwitch + TimeBase + 'static {}
