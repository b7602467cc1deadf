//! Pool activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of a pool's task counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks accepted into the queue.
    pub submitted: u64,
    /// Tasks that ran to completion.
    pub executed: u64,
    /// Tasks run by a thread draining the queue while it waits
    /// ([`ThreadPool::wait`](crate::ThreadPool::wait), [`Future::wait`](crate::Future::wait)
    /// or [`WorkerContext::run_pending`](crate::WorkerContext::run_pending)).
    pub stolen: u64,
    /// Tasks that panicked. The panic is caught and the thread keeps going.
    pub panicked: u64,
    /// Large payloads decoded into heap memory because the thread's arena
    /// was exhausted.
    pub heap_fallbacks: u64,
}

impl PoolStats {
    /// Tasks dequeued so far, whether they completed or panicked.
    pub fn finished(&self) -> u64 {
        self.executed + self.panicked
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) executed: AtomicU64,
    pub(crate) stolen: AtomicU64,
    pub(crate) panicked: AtomicU64,
    pub(crate) heap_fallbacks: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            stolen: self.stolen.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            heap_fallbacks: self.heap_fallbacks.load(Ordering::Relaxed),
        }
    }
}
