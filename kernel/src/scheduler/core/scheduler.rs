//! Ready queues
//!
//! One ordered list per scheduling domain: a single shared list for global
//! policies, one list per core for partitioned ones. Each core also has a
//! *chosen* thread, the one it runs or is about to run. A chosen thread is
//! never in a list; `choose*` moves it back before picking a successor.
//!
//! # Design
//! - Ranks are read through `Schedulables` at insertion time
//! - Removing a core's chosen thread immediately chooses a successor, so a
//!   core always has a chosen thread while its idle thread exists

use alloc::vec::Vec;

use crate::arch::CpuId;
use crate::scheduler::criterion::Rank;
use crate::scheduler::queue::OrderedQueue;
use crate::scheduler::thread::ThreadId;

/// Rank and queue lookup for threads known to the scheduler
pub trait Schedulables {
    fn rank_of(&self, thread: ThreadId) -> Rank;

    /// Ready list index (0 for global policies)
    fn queue_of(&self, thread: ThreadId) -> usize;
}

pub struct Scheduler {
    lists: Vec<OrderedQueue>,
    chosen: Vec<Option<ThreadId>>,
}

impl Scheduler {
    /// `queues` lists shared by `cores` cores
    pub fn new(queues: usize, cores: usize) -> Self {
        let mut lists = Vec::with_capacity(queues);
        lists.resize_with(queues.max(1), OrderedQueue::new);
        Self {
            lists,
            chosen: alloc::vec![None; cores],
        }
    }

    #[inline]
    fn partitioned(&self) -> bool {
        self.lists.len() > 1
    }

    /// List a core draws from
    #[inline]
    fn list_of_core(&self, cpu: CpuId) -> usize {
        if self.partitioned() {
            cpu
        } else {
            0
        }
    }

    fn list_of<S: Schedulables>(&self, threads: &S, thread: ThreadId) -> usize {
        if self.partitioned() {
            threads.queue_of(thread).min(self.lists.len() - 1)
        } else {
            0
        }
    }

    /// Admit a ready thread
    pub fn insert<S: Schedulables>(&mut self, threads: &S, thread: ThreadId) {
        let list = self.list_of(threads, thread);
        self.lists[list].insert(thread, threads.rank_of(thread));
    }

    /// Forget a thread; a chosen thread is replaced by its list's head
    ///
    /// Returns whether the thread was known.
    pub fn remove<S: Schedulables>(&mut self, threads: &S, thread: ThreadId) -> bool {
        if let Some(cpu) = self.core_of(thread) {
            let list = self.list_of_core(cpu);
            self.chosen[cpu] = self.lists[list].pop_front();
            return true;
        }
        let list = self.list_of(threads, thread);
        self.lists[list].remove(thread)
    }

    /// Take a thread out of consideration without destroying it
    pub fn suspend<S: Schedulables>(&mut self, threads: &S, thread: ThreadId) -> bool {
        self.remove(threads, thread)
    }

    /// Re-admit a suspended thread
    pub fn resume<S: Schedulables>(&mut self, threads: &S, thread: ThreadId) {
        self.insert(threads, thread)
    }

    /// Re-queue the chosen thread and pick the most urgent one of `cpu`'s list
    pub fn choose<S: Schedulables>(&mut self, threads: &S, cpu: CpuId) -> Option<ThreadId> {
        if let Some(current) = self.chosen[cpu].take() {
            self.insert(threads, current);
        }
        let list = self.list_of_core(cpu);
        self.chosen[cpu] = self.lists[list].pop_front();
        self.chosen[cpu]
    }

    /// Pick the head of `cpu`'s list instead of the chosen thread
    ///
    /// The head is taken even if it is less urgent. With an empty list the
    /// chosen thread stays.
    pub fn choose_another<S: Schedulables>(
        &mut self,
        threads: &S,
        cpu: CpuId,
    ) -> Option<ThreadId> {
        let list = self.list_of_core(cpu);
        let Some(next) = self.lists[list].pop_front() else {
            return self.chosen[cpu];
        };
        if let Some(current) = self.chosen[cpu].replace(next) {
            self.insert(threads, current);
        }
        Some(next)
    }

    /// Make a specific ready thread of `cpu`'s list the chosen one
    pub fn choose_thread<S: Schedulables>(
        &mut self,
        threads: &S,
        cpu: CpuId,
        thread: ThreadId,
    ) -> Option<ThreadId> {
        if self.chosen[cpu] == Some(thread) {
            return Some(thread);
        }
        let list = self.list_of_core(cpu);
        if !self.lists[list].remove(thread) {
            return None;
        }
        if let Some(current) = self.chosen[cpu].replace(thread) {
            self.insert(threads, current);
        }
        Some(thread)
    }

    /// Thread selected on `cpu`
    #[inline]
    pub fn chosen(&self, cpu: CpuId) -> Option<ThreadId> {
        self.chosen.get(cpu).copied().flatten()
    }

    /// Install the first thread of a core at boot
    pub fn set_chosen(&mut self, cpu: CpuId, thread: ThreadId) {
        self.chosen[cpu] = Some(thread);
    }

    /// Core that has `thread` chosen
    pub fn core_of(&self, thread: ThreadId) -> Option<CpuId> {
        self.chosen.iter().position(|c| *c == Some(thread))
    }

    /// Ready threads waiting in `cpu`'s list
    pub fn schedulables(&self, cpu: CpuId) -> usize {
        self.lists[self.list_of_core(cpu)].len()
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.core_of(thread).is_some() || self.lists.iter().any(|l| l.contains(thread))
    }

    pub fn cores(&self) -> usize {
        self.chosen.len()
    }
}
