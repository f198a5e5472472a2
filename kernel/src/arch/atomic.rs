//! Atomic primitives used by the synchronizers
//!
//! Every primitive returns the value held *before* the operation, matching
//! the usual test-and-set / fetch-and-op instruction semantics.

use core::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

/// Test-and-set: raise the flag, return its previous value
#[inline]
pub fn tsl(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::AcqRel)
}

/// Fetch-and-increment
#[inline]
pub fn finc(value: &AtomicIsize) -> isize {
    value.fetch_add(1, Ordering::AcqRel)
}

/// Fetch-and-decrement
#[inline]
pub fn fdec(value: &AtomicIsize) -> isize {
    value.fetch_sub(1, Ordering::AcqRel)
}

/// Compare-and-swap: store `new` if the value equals `current`
///
/// Returns the previous value whether or not the swap happened.
#[inline]
pub fn cas(value: &AtomicIsize, current: isize, new: isize) -> isize {
    match value.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire) {
        Ok(previous) | Err(previous) => previous,
    }
}
