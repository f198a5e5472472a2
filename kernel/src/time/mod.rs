//! Time base
//!
//! The kernel only consumes a monotonic tick counter. Durations given by
//! applications in microseconds are converted to ticks once, when a
//! criterion or alarm is built, and all arithmetic afterwards is in ticks.

pub mod alarm;

pub use alarm::{Alarm, AlarmId, JobStats};

/// Time-base ticks since boot
pub type Tick = u64;

/// Wall-clock duration in microseconds
pub type Microsecond = u64;

/// Tick rate in ticks per second
pub type Hertz = u64;

const MICROSECONDS_PER_SECOND: u128 = 1_000_000;

/// Monotonic tick source shared by all cores
pub trait TimeBase: Send + Sync {
    /// Ticks elapsed since boot
    fn elapsed(&self) -> Tick;

    /// Tick rate
    fn frequency(&self) -> Hertz;

    /// Convert a duration to ticks (truncating)
    fn ticks(&self, time: Microsecond) -> Tick {
        to_ticks(time, self.frequency())
    }

    /// Convert ticks to a duration (truncating)
    fn time(&self, ticks: Tick) -> Microsecond {
        to_time(ticks, self.frequency())
    }
}

/// Microseconds to ticks at `frequency`
#[inline]
pub fn to_ticks(time: Microsecond, frequency: Hertz) -> Tick {
    (time as u128 * frequency as u128 / MICROSECONDS_PER_SECOND) as Tick
}

/// Ticks to microseconds at `frequency`
#[inline]
pub fn to_time(ticks: Tick, frequency: Hertz) -> Microsecond {
    if frequency == 0 {
        return 0;
    }
    (ticks as u128 * MICROSECONDS_PER_SECOND / frequency as u128) as Microsecond
}
