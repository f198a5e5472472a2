// src/lib.rs
// Point d'entrée de la bibliothèque du noyau
#![cfg_attr(not(test), no_std)]

//! Real-time thread scheduling core
//!
//! Threads, ready queues with pluggable scheduling criteria (static
//! priority, round-robin, FCFS, RM, DM, EDF, LLF, partitioned LLF),
//! blocking synchronizers with priority ceiling and inheritance, and
//! periodic threads released by a timer. The hardware is reached only
//! through the traits of [`arch`].

extern crate alloc;

pub mod arch;
pub mod config;
pub mod logger;
pub mod scheduler;
pub mod sync;
pub mod time;

pub use arch::{ContextEntry, ContextSwitch, Cpu, CpuId, Interrupt, InterruptController, Platform};
pub use config::KernelConfig;
pub use scheduler::criterion::{
    APERIODIC, CEILING, HIGH, IDLE, ISR, LOW, MAIN, NORMAL, PERIODIC, SPORADIC,
};
pub use scheduler::{
    CpuMask, Criterion, Kernel, Policy, Rank, RtConfig, SchedulerError, SchedulerResult,
    ThreadConfig, ThreadId, ThreadInfo, ThreadState, ThreadStats,
};
pub use sync::{Condition, Mutex, Protocol, Semaphore, SyncId};
pub use time::{JobStats, Microsecond, Tick, TimeBase};
