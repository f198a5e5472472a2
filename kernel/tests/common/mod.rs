//! Hosted platform for integration tests
//!
//! Every kernel thread runs on its own OS thread and only makes progress
//! while it holds its context's baton. `switch_context` hands the baton to
//! the next context and waits for it to come back. Time is virtual: the
//! clock advances one tick per `work` step or per halt of core 0, and every
//! tick raises the timer interrupt on all cores. Pending interrupts are
//! delivered when the current core has interrupts enabled and reaches
//! `int_enable`, `work` or `halt`.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once, RwLock};
use std::time::Duration;

use rtsched_kernel::arch::{
    ContextEntry, ContextSwitch, Cpu, CpuId, Interrupt, InterruptController, InterruptHandler,
};
use rtsched_kernel::logger::{self, ConsoleSink};
use rtsched_kernel::scheduler::thread::Stack;
use rtsched_kernel::time::{Hertz, Tick, TimeBase};
use rtsched_kernel::{Kernel, KernelConfig};

/// Tick rate of the virtual clock (1 tick = 1ms)
pub const FREQUENCY: Hertz = 1000;

/// Wall-clock budget of one simulated run
const RUN_TIMEOUT: Duration = Duration::from_secs(60);

const TIMER: u8 = 1 << 0;
const RESCHEDULE: u8 = 1 << 1;

thread_local! {
    static CURRENT_CORE: Cell<Option<CpuId>> = const { Cell::new(None) };
}

fn park_forever() -> ! {
    loop {
        std::thread::park();
    }
}

struct StderrSink;

impl ConsoleSink for StderrSink {
    fn write_bytes(&self, bytes: &[u8]) {
        eprint!("{}", String::from_utf8_lossy(bytes));
    }
}

static STDERR: StderrSink = StderrSink;
static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        logger::init_with_level(&STDERR, log::LevelFilter::Warn);
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The idle thread of core 0 rebooted after the last thread exited
    Rebooted,
    /// A kernel thread panicked
    Failed(String),
    TimedOut,
}

/// Shared machine state
pub struct Machine {
    cores: usize,
    clock: AtomicU64,
    enabled: Vec<AtomicBool>,
    pending: Vec<AtomicU8>,
    handlers: RwLock<HashMap<Interrupt, InterruptHandler>>,
    ipis: AtomicUsize,
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl Machine {
    fn finish(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock().unwrap();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.done.notify_all();
    }

    fn is_finished(&self) -> bool {
        self.outcome.lock().unwrap().is_some()
    }

    fn wait_finished(&self) {
        let slot = self.outcome.lock().unwrap();
        let (mut slot, timeout) = self
            .done
            .wait_timeout_while(slot, RUN_TIMEOUT, |s| s.is_none())
            .unwrap();
        if timeout.timed_out() {
            *slot = Some(Outcome::TimedOut);
        }
    }

    fn outcome(&self) -> Outcome {
        self.outcome
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Outcome::TimedOut)
    }

    fn tick(&self) {
        self.clock.fetch_add(1, Ordering::SeqCst);
        for pending in &self.pending {
            pending.fetch_or(TIMER, Ordering::SeqCst);
        }
    }
}

/// Run state of one context
struct Slot {
    /// Core granted to the context and not yet picked up
    grant: Option<CpuId>,
    retired: bool,
    spawned: bool,
}

struct Baton {
    slot: Mutex<Slot>,
    turn: Condvar,
    entry: Mutex<Option<ContextEntry>>,
}

impl Baton {
    fn grant(self: &Arc<Self>, cpu: CpuId, machine: &Arc<Machine>) {
        let spawn = {
            let mut slot = self.slot.lock().unwrap();
            slot.grant = Some(cpu);
            !std::mem::replace(&mut slot.spawned, true)
        };
        self.turn.notify_all();
        if spawn {
            let baton = Arc::clone(self);
            let machine = Arc::clone(machine);
            std::thread::spawn(move || baton.run(machine));
        }
    }

    /// Block until the context is granted a core
    fn wait_turn(&self) {
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(cpu) = slot.grant.take() {
                CURRENT_CORE.with(|c| c.set(Some(cpu)));
                return;
            }
            if slot.retired {
                drop(slot);
                park_forever();
            }
            slot = self.turn.wait(slot).unwrap();
        }
    }

    fn run(&self, machine: Arc<Machine>) {
        self.wait_turn();
        let entry = self.entry.lock().unwrap().take();
        if let Some(entry) = entry {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(entry)) {
                let message = payload
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "kernel thread panicked".to_string());
                machine.finish(Outcome::Failed(message));
            }
        }
        park_forever();
    }

    fn retire(&self) {
        self.slot.lock().unwrap().retired = true;
        self.turn.notify_all();
    }
}

pub struct HostContext(Arc<Baton>);

/// Simulated multicore machine
pub struct Host {
    machine: Arc<Machine>,
}

impl Host {
    pub fn new(cores: usize) -> Self {
        Self {
            machine: Arc::new(Machine {
                cores,
                clock: AtomicU64::new(0),
                enabled: (0..cores).map(|_| AtomicBool::new(false)).collect(),
                pending: (0..cores).map(|_| AtomicU8::new(0)).collect(),
                handlers: RwLock::new(HashMap::new()),
                ipis: AtomicUsize::new(0),
                outcome: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    /// Compute for `ticks` ticks, taking interrupts along the way
    pub fn work(&self, ticks: Tick) {
        for _ in 0..ticks {
            self.machine.tick();
            self.deliver();
        }
    }

    pub fn ipis(&self) -> usize {
        self.machine.ipis.load(Ordering::SeqCst)
    }

    fn handler(&self, interrupt: Interrupt) -> Option<InterruptHandler> {
        self.machine
            .handlers
            .read()
            .unwrap()
            .get(&interrupt)
            .cloned()
    }

    /// Run pending interrupt handlers of the current core
    fn deliver(&self) {
        loop {
            let cpu = self.id();
            if !self.machine.enabled[cpu].load(Ordering::SeqCst) {
                return;
            }
            let bits = self.machine.pending[cpu].swap(0, Ordering::SeqCst);
            if bits == 0 {
                return;
            }
            self.machine.enabled[cpu].store(false, Ordering::SeqCst);
            for (bit, interrupt) in [(TIMER, Interrupt::Timer), (RESCHEDULE, Interrupt::Reschedule)] {
                if bits & bit != 0 {
                    if let Some(handler) = self.handler(interrupt) {
                        handler(interrupt);
                    }
                }
            }
            // The handler may have switched away and come back elsewhere
            let cpu = self.id();
            self.machine.enabled[cpu].store(true, Ordering::SeqCst);
        }
    }
}

impl Cpu for Host {
    fn id(&self) -> CpuId {
        CURRENT_CORE.with(|c| c.get()).unwrap_or(0)
    }

    fn cores(&self) -> usize {
        self.machine.cores
    }

    fn int_enable(&self) {
        self.machine.enabled[self.id()].store(true, Ordering::SeqCst);
        self.deliver();
    }

    fn int_disable(&self) {
        self.machine.enabled[self.id()].store(false, Ordering::SeqCst);
    }

    fn int_enabled(&self) -> bool {
        self.machine.enabled[self.id()].load(Ordering::SeqCst)
    }

    fn halt(&self) {
        if self.machine.is_finished() {
            park_forever();
        }
        if self.id() == 0 {
            self.machine.tick();
        } else {
            std::thread::sleep(Duration::from_micros(50));
        }
        self.deliver();
    }

    fn reboot(&self) -> ! {
        self.machine.finish(Outcome::Rebooted);
        park_forever();
    }
}

impl InterruptController for Host {
    fn install_handler(&self, interrupt: Interrupt, handler: InterruptHandler) {
        self.machine
            .handlers
            .write()
            .unwrap()
            .insert(interrupt, handler);
    }

    fn enable(&self, _interrupt: Interrupt) {}

    fn send_ipi(&self, cpu: CpuId, interrupt: Interrupt) {
        let bit = match interrupt {
            Interrupt::Timer => TIMER,
            Interrupt::Reschedule => RESCHEDULE,
        };
        self.machine.ipis.fetch_add(1, Ordering::SeqCst);
        self.machine.pending[cpu].fetch_or(bit, Ordering::SeqCst);
    }
}

impl ContextSwitch for Host {
    type Context = HostContext;

    fn init_context(&self, _stack: &mut Stack, entry: ContextEntry) -> HostContext {
        // Hosted contexts run on their OS thread's stack
        HostContext(Arc::new(Baton {
            slot: Mutex::new(Slot {
                grant: None,
                retired: false,
                spawned: false,
            }),
            turn: Condvar::new(),
            entry: Mutex::new(Some(entry)),
        }))
    }

    fn switch_context(&self, prev: &HostContext, next: &HostContext) {
        next.0.grant(self.id(), &self.machine);
        prev.0.wait_turn();
    }

    fn load_context(&self, cpu: CpuId, first: &HostContext) {
        first.0.grant(cpu, &self.machine);
        if cpu == 0 {
            self.machine.wait_finished();
        }
    }

    fn release_context(&self, context: &HostContext) {
        context.0.retire();
    }
}

impl TimeBase for Host {
    fn elapsed(&self) -> Tick {
        self.machine.clock.load(Ordering::SeqCst)
    }

    fn frequency(&self) -> Hertz {
        FREQUENCY
    }
}

/// Result of one simulated run
pub struct Report {
    pub outcome: Outcome,
    pub ipis: usize,
    pub ticks: Tick,
}

impl Report {
    pub fn assert_clean(&self) {
        assert_eq!(self.outcome, Outcome::Rebooted);
    }
}

/// Boot a `cores`-core machine with `main` as the application entry and
/// wait until the kernel reboots
pub fn run<F>(cores: usize, config: KernelConfig, main: F) -> Report
where
    F: FnOnce(Arc<Kernel<Host>>) -> i32 + Send + 'static,
{
    init_logger();
    let kernel = Kernel::new(Host::new(cores), config).expect("valid configuration");
    let machine = Arc::clone(&kernel.platform().machine);

    let handle = Arc::clone(&kernel);
    kernel.init(move || main(handle)).expect("kernel init");
    kernel.start();

    Report {
        outcome: machine.outcome(),
        ipis: machine.ipis.load(Ordering::SeqCst),
        ticks: machine.clock.load(Ordering::SeqCst),
    }
}

/// Event log shared between kernel threads and the test
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
