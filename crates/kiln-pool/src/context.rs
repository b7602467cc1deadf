//! Per-thread execution context handed to every task.

use std::fmt;

use kiln_arena::{Arena, ArenaScope};

use crate::pool::PoolHandle;

/// The calling thread's view of a pool: its private scratch arena, its
/// thread index and a handle for submitting more work.
///
/// Every task receives the context of the thread running it. The owner
/// thread's context comes from [`ThreadPool::context`](crate::ThreadPool::context);
/// other threads can build one with
/// [`PoolHandle::external_context`](PoolHandle::external_context).
///
/// Thread indices: the pool owner is 0, workers are `1..=thread_count`, and
/// external contexts get fresh indices above that.
pub struct WorkerContext {
    arena: Arena,
    index: usize,
    pool: PoolHandle,
}

impl WorkerContext {
    pub(crate) fn new(arena: Arena, index: usize, pool: PoolHandle) -> Self {
        Self { arena, index, pool }
    }

    /// This thread's scratch arena.
    ///
    /// Allocations made directly on it persist until the thread exits, or
    /// until the current task returns if its payload was larger than
    /// [`INLINE_CAPACITY`](crate::INLINE_CAPACITY). Use
    /// [`scope`](WorkerContext::scope) for temporary memory.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Open a scratch scope on this thread's arena.
    pub fn scope(&mut self) -> ArenaScope<'_> {
        self.arena.scope()
    }

    /// Index of the thread this context belongs to.
    pub fn thread_index(&self) -> usize {
        self.index
    }

    /// Whether this context belongs to one of the pool's worker threads.
    pub fn is_worker(&self) -> bool {
        (1..=self.pool.thread_count()).contains(&self.index)
    }

    /// Handle to the pool, for submitting follow-up work.
    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    /// Run queued tasks on this thread until the queue is empty.
    ///
    /// Returns the number of tasks run. Tasks submitted while draining are
    /// picked up too.
    pub fn run_pending(&mut self) -> usize {
        let pool = self.pool.clone();
        pool.steal(self)
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("index", &self.index)
            .field("arena", &self.arena)
            .finish_non_exhaustive()
    }
}
