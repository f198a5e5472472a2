//! Affinity - core sets
//!
//! Used to compute which cores need a reschedule request after threads
//! become ready.

use crate::arch::CpuId;

/// Largest number of cores a mask can describe
pub const MAX_CPUS: usize = 64;

/// Set of cores (64 CPUs max)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuMask(u64);

impl CpuMask {
    /// Create empty mask
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Mask with cores `0..cores`
    pub const fn first_n(cores: usize) -> Self {
        if cores >= MAX_CPUS {
            Self(u64::MAX)
        } else {
            Self((1u64 << cores) - 1)
        }
    }

    /// Create mask for single CPU
    pub const fn single(cpu: CpuId) -> Self {
        Self(1 << (cpu & 63))
    }

    /// Clear CPU bit
    pub fn clear(&mut self, cpu: CpuId) {
        self.0 &= !(1 << (cpu & 63));
    }

    /// Check if CPU is set
    pub fn is_set(&self, cpu: CpuId) -> bool {
        (self.0 & (1 << (cpu & 63))) != 0
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Union with another mask
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set CPUs in ascending order
    pub fn iter(&self) -> impl Iterator<Item = CpuId> {
        let bits = self.0;
        (0..MAX_CPUS).filter(move |cpu| bits & (1 << cpu) != 0)
    }
}
