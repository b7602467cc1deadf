//! Thread pool configuration.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kiln_arena::ArenaConfig;
use kiln_core::mem::KIB;

use crate::context::WorkerContext;
use crate::error::ConfigError;
use crate::task::HEADER_SIZE;

/// Callback run on a worker thread with that worker's context, right after
/// its arena is created (start) or right before the thread exits (stop).
pub type WorkerHook = Arc<dyn Fn(&mut WorkerContext) + Send + Sync>;

/// Number of logical cores available to this process (at least 1).
pub fn logical_cores() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Worker count that leaves one core for the submitting thread.
pub fn optimal_thread_count() -> usize {
    logical_cores().saturating_sub(1).max(1)
}

/// Configuration for [`ThreadPool::new`](crate::ThreadPool::new).
///
/// Validated by [`validate`](PoolConfig::validate) when the pool is built.
#[derive(Clone)]
pub struct PoolConfig {
    /// Number of worker threads. Zero builds a pool that only provides the
    /// owner thread's scratch arena; submissions then fail with
    /// [`SubmitError::NoWorkers`](crate::SubmitError::NoWorkers).
    pub thread_count: usize,

    /// Bytes of queue space for encoded tasks (header plus inline payload).
    /// Rounded up to a power of two. Ignored when `thread_count` is zero.
    ///
    /// Default: 64 KiB.
    pub queue_capacity: usize,

    /// Address space reserved for each thread's scratch arena.
    ///
    /// Default: 64 MiB.
    pub arena_reserve: usize,

    /// Bytes each scratch arena commits eagerly.
    ///
    /// Default: 4 KiB.
    pub arena_commit: usize,

    /// Run on each worker after its arena exists, before it takes work.
    pub on_worker_start: Option<WorkerHook>,

    /// Run on each worker after it stops taking work.
    pub on_worker_stop: Option<WorkerHook>,

    /// How long construction waits for every worker to become ready.
    ///
    /// Default: 10 s.
    pub startup_timeout: Duration,

    /// How long a submission spins on a full queue before giving up.
    /// `None` spins until space frees up.
    pub submit_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Default task queue size.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 64 * KIB;

    /// Default worker startup timeout.
    pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

    /// Smallest queue capacity that can hold one task header.
    pub const MIN_QUEUE_CAPACITY: usize = HEADER_SIZE + 1;

    /// Defaults with an explicit worker count.
    pub fn new(thread_count: usize) -> Self {
        Self {
            thread_count,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            arena_reserve: ArenaConfig::DEFAULT_RESERVE,
            arena_commit: ArenaConfig::DEFAULT_COMMIT,
            on_worker_start: None,
            on_worker_stop: None,
            startup_timeout: Self::DEFAULT_STARTUP_TIMEOUT,
            submit_timeout: None,
        }
    }

    /// Set the worker start hook.
    pub fn on_worker_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut WorkerContext) + Send + Sync + 'static,
    {
        self.on_worker_start = Some(Arc::new(hook));
        self
    }

    /// Set the worker stop hook.
    pub fn on_worker_stop<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut WorkerContext) + Send + Sync + 'static,
    {
        self.on_worker_stop = Some(Arc::new(hook));
        self
    }

    /// Sizing for every scratch arena the pool creates.
    pub fn arena_config(&self) -> ArenaConfig {
        ArenaConfig {
            reserve: self.arena_reserve,
            commit: self.arena_commit,
        }
    }

    /// Check every field for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arena_reserve == 0 {
            return Err(ConfigError::ArenaReserveZero);
        }
        if self.arena_commit > self.arena_reserve {
            return Err(ConfigError::CommitExceedsReserve {
                commit: self.arena_commit,
                reserve: self.arena_reserve,
            });
        }
        if self.thread_count > 0 && self.queue_capacity < Self::MIN_QUEUE_CAPACITY {
            return Err(ConfigError::QueueTooSmall {
                configured: self.queue_capacity,
                min: Self::MIN_QUEUE_CAPACITY,
            });
        }
        if self.startup_timeout.is_zero() {
            return Err(ConfigError::ZeroStartupTimeout);
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(optimal_thread_count())
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("thread_count", &self.thread_count)
            .field("queue_capacity", &self.queue_capacity)
            .field("arena_reserve", &self.arena_reserve)
            .field("arena_commit", &self.arena_commit)
            .field("on_worker_start", &self.on_worker_start.is_some())
            .field("on_worker_stop", &self.on_worker_stop.is_some())
            .field("startup_timeout", &self.startup_timeout)
            .field("submit_timeout", &self.submit_timeout)
            .finish()
    }
}
