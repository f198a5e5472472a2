//! Stack - Thread stack allocation
//!
//! Owned by the thread record. The first word holds the exit status once
//! the thread finishes, so the status survives until the thread is reaped.

use alloc::vec;
use alloc::boxed::Box;

/// Default stack size (16KB)
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// Smallest stack the kernel accepts
pub const MIN_STACK_SIZE: usize = 1024;

const WORD: usize = core::mem::size_of::<usize>();

/// Thread stack
pub struct Stack {
    words: Box<[usize]>,
}

impl Stack {
    /// Allocate a zeroed stack of at least `size` bytes
    pub fn new(size: usize) -> Self {
        let words = size.max(MIN_STACK_SIZE).div_ceil(WORD);
        Self {
            words: vec![0usize; words].into_boxed_slice(),
        }
    }

    /// Get stack size (bytes)
    pub fn size(&self) -> usize {
        self.words.len() * WORD
    }

    /// Lowest address
    pub fn base(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }

    /// One past the highest address (initial stack pointer)
    pub fn top(&mut self) -> *mut u8 {
        let size = self.size();
        // SAFETY: one-past-the-end of the same allocation
        unsafe { self.base().add(size) }
    }

    /// Status stored by `exit`
    pub fn exit_status(&self) -> i32 {
        self.words[0] as isize as i32
    }

    pub(crate) fn set_exit_status(&mut self, status: i32) {
        self.words[0] = status as isize as usize;
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack").field("size", &self.size()).finish()
    }
}
