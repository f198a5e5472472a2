//! Idle Thread Implementation
//!
//! One idle thread per core, ranked `IDLE` so it is only picked when the
//! core has nothing else to run.
//!
//! # Design
//! - Halts between interrupts while application threads exist
//! - Yields as soon as its core's ready list is not empty (non-preemptive
//!   policies never reschedule on arrival)
//! - When only idle threads remain, core 0 reports and reboots (or halts)

use crate::arch::Platform;
use crate::scheduler::kernel::Kernel;

impl<P: Platform> Kernel<P> {
    /// Idle thread body
    pub(crate) fn idle(&self) -> ! {
        log::debug!("[SCHED] idle thread started on core {}", self.platform().id());

        while self.thread_count() > self.cores() {
            self.platform().int_enable();
            self.platform().halt();

            // Global policies may have moved us to another core
            let cpu = self.platform().id();
            let ready = self.lock().scheduler.schedulables(cpu);
            if ready > 0 {
                self.yield_now();
            }
        }

        self.platform().int_disable();
        if self.platform().id() == 0 {
            log::info!("[SCHED] the last application thread has exited");
            if self.config().reboot {
                log::info!("[SCHED] rebooting");
                self.platform().reboot();
            }
            log::info!("[SCHED] halting");
        }
        loop {
            self.platform().halt();
        }
    }
}
