//! A one-shot completion flag that helps drain the pool while it waits.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::context::WorkerContext;
use crate::pool::PoolHandle;

/// Signals that one piece of work has finished.
///
/// A waiting thread first runs queued tasks itself and only then sleeps.
/// That makes it safe to wait from inside a task, even on a pool with a
/// single worker: the task being waited for is either already running
/// elsewhere or gets run by the waiter.
///
/// ```
/// use std::sync::Arc;
/// use kiln_pool::{Future, PoolConfig, ThreadPool};
///
/// let mut pool = ThreadPool::new(PoolConfig::new(1)).unwrap();
/// let done = Arc::new(Future::new(pool.handle()));
/// let signal = Arc::clone(&done);
/// pool.add(move |_ctx| signal.signal()).unwrap();
/// done.wait(pool.context());
/// assert!(done.is_done());
/// ```
pub struct Future {
    pool: PoolHandle,
    done: Mutex<bool>,
    cond: Condvar,
}

impl Future {
    /// An unsignaled future tied to `pool`.
    pub fn new(pool: &PoolHandle) -> Self {
        Self {
            pool: pool.clone(),
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the work finished and wake every waiter.
    pub fn signal(&self) {
        let mut done = self.lock();
        *done = true;
        self.cond.notify_all();
    }

    /// Run pending pool tasks on `ctx`, then block until signaled.
    pub fn wait(&self, ctx: &mut WorkerContext) {
        self.pool.steal(ctx);
        let mut done = self.lock();
        while !*done {
            done = self
                .cond
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Whether [`signal`](Future::signal) has been called since creation or
    /// the last reset.
    pub fn is_done(&self) -> bool {
        *self.lock()
    }

    /// Make the future reusable.
    ///
    /// # Panics
    ///
    /// Panics if the future has not been signaled.
    pub fn reset(&self) {
        let mut done = self.lock();
        assert!(*done, "reset of a future that was never signaled");
        *done = false;
    }
}

impl fmt::Debug for Future {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PoolConfig, ThreadPool};
    use std::sync::Arc;

    fn pool(threads: usize) -> ThreadPool {
        let mut config = PoolConfig::new(threads);
        config.arena_reserve = 1 << 20;
        ThreadPool::new(config).unwrap()
    }

    #[test]
    fn signal_then_wait_returns_immediately() {
        let mut pool = pool(1);
        let future = Future::new(pool.handle());
        future.signal();
        future.wait(pool.context());
        assert!(future.is_done());
    }

    #[test]
    fn reset_allows_reuse() {
        let mut pool = pool(2);
        let future = Arc::new(Future::new(pool.handle()));
        for _ in 0..3 {
            let signal = Arc::clone(&future);
            pool.add(move |_| signal.signal()).unwrap();
            future.wait(pool.context());
            future.reset();
            assert!(!future.is_done());
        }
    }

    #[test]
    #[should_panic(expected = "never signaled")]
    fn reset_unsignaled_panics() {
        let pool = pool(1);
        Future::new(pool.handle()).reset();
    }

    #[test]
    fn nested_wait_on_single_worker() {
        let mut pool = pool(1);
        let outer = Arc::new(Future::new(pool.handle()));
        let outer_signal = Arc::clone(&outer);
        pool.add(move |ctx| {
            // Only one worker: the inner task can only run if this task
            // drains the queue itself while waiting.
            let inner = Arc::new(Future::new(ctx.pool()));
            let inner_signal = Arc::clone(&inner);
            ctx.pool().add(move |_| inner_signal.signal()).unwrap();
            inner.wait(ctx);
            outer_signal.signal();
        })
        .unwrap();
        outer.wait(pool.context());
        pool.wait();
        assert!(outer.is_done());
    }
}
