//! Rank-ordered thread queue
//!
//! Used for ready lists and synchronizer wait queues alike. Entries are kept
//! sorted by rank ascending; equal ranks keep insertion order, so the head
//! is always the oldest of the most urgent entries.
//!
//! The rank is captured at insertion. Changing a queued thread's rank
//! requires `remove` then `insert`.

use alloc::collections::VecDeque;

use super::criterion::Rank;
use super::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    rank: Rank,
    thread: ThreadId,
}

#[derive(Debug, Default)]
pub struct OrderedQueue {
    entries: VecDeque<Entry>,
}

impl OrderedQueue {
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Insert behind every entry of rank `<= rank`
    pub fn insert(&mut self, thread: ThreadId, rank: Rank) {
        let pos = self.entries.partition_point(|e| e.rank <= rank);
        self.entries.insert(pos, Entry { rank, thread });
    }

    /// Remove `thread`; returns whether it was queued
    pub fn remove(&mut self, thread: ThreadId) -> bool {
        match self.entries.iter().position(|e| e.thread == thread) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Remove and return the most urgent entry
    pub fn pop_front(&mut self) -> Option<ThreadId> {
        self.entries.pop_front().map(|e| e.thread)
    }

    pub fn head(&self) -> Option<ThreadId> {
        self.entries.front().map(|e| e.thread)
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.entries.iter().any(|e| e.thread == thread)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Threads in dequeue order
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.entries.iter().map(|e| e.thread)
    }
}
