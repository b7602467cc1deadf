//! Error types for pool construction, configuration and task submission.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use kiln_arena::ArenaError;
use kiln_ring::RingError;

// ── ConfigError ──────────────────────────────────────────────────

/// A [`PoolConfig`](crate::PoolConfig) that cannot describe a working pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `arena_reserve` is zero.
    ArenaReserveZero,
    /// `arena_commit` exceeds `arena_reserve`.
    CommitExceedsReserve {
        /// Configured eager commit.
        commit: usize,
        /// Configured reservation.
        reserve: usize,
    },
    /// The task queue cannot hold even one task header.
    QueueTooSmall {
        /// Configured queue capacity.
        configured: usize,
        /// Smallest usable capacity.
        min: usize,
    },
    /// `startup_timeout` is zero.
    ZeroStartupTimeout,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArenaReserveZero => write!(f, "arena_reserve must be non-zero"),
            Self::CommitExceedsReserve { commit, reserve } => {
                write!(f, "arena_commit {commit} exceeds arena_reserve {reserve}")
            }
            Self::QueueTooSmall { configured, min } => {
                write!(f, "queue_capacity {configured} is below minimum of {min}")
            }
            Self::ZeroStartupTimeout => write!(f, "startup_timeout must be non-zero"),
        }
    }
}

impl Error for ConfigError {}

// ── PoolError ────────────────────────────────────────────────────

/// Failure to construct a [`ThreadPool`](crate::ThreadPool).
///
/// Whatever was started before the failure has been shut down by the time
/// this is returned.
#[derive(Debug)]
pub enum PoolError {
    /// The configuration failed validation.
    Config(ConfigError),
    /// The task queue could not be created.
    Queue(RingError),
    /// The owner thread's scratch arena could not be created.
    Arena(ArenaError),
    /// A worker thread could not be spawned.
    Spawn {
        /// Index the worker would have had.
        index: usize,
        /// The spawn error.
        source: std::io::Error,
    },
    /// One or more workers failed to initialise (arena creation or the
    /// start hook).
    WorkerInit {
        /// Number of workers that failed.
        failed: usize,
    },
    /// Not every worker became ready within the startup timeout.
    StartupTimeout {
        /// Workers that reported ready.
        ready: usize,
        /// Workers that were spawned.
        expected: usize,
        /// The configured timeout.
        timeout: Duration,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Queue(e) => write!(f, "task queue: {e}"),
            Self::Arena(e) => write!(f, "owner arena: {e}"),
            Self::Spawn { index, source } => {
                write!(f, "failed to spawn worker {index}: {source}")
            }
            Self::WorkerInit { failed } => {
                write!(f, "{failed} worker(s) failed to initialise")
            }
            Self::StartupTimeout {
                ready,
                expected,
                timeout,
            } => {
                write!(
                    f,
                    "only {ready} of {expected} workers ready after {}ms",
                    timeout.as_millis()
                )
            }
        }
    }
}

impl Error for PoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Queue(e) => Some(e),
            Self::Arena(e) => Some(e),
            Self::Spawn { source, .. } => Some(source),
            Self::WorkerInit { .. } | Self::StartupTimeout { .. } => None,
        }
    }
}

impl From<ConfigError> for PoolError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<RingError> for PoolError {
    fn from(e: RingError) -> Self {
        Self::Queue(e)
    }
}

impl From<ArenaError> for PoolError {
    fn from(e: ArenaError) -> Self {
        Self::Arena(e)
    }
}

// ── SubmitError ──────────────────────────────────────────────────

/// Error submitting a task. The task is dropped (closures) or handed back
/// to its owner (`Arc` tasks are released) when this is returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// The pool was built with zero worker threads.
    NoWorkers,
    /// The pool has shut down.
    Shutdown,
    /// The encoded task is larger than the whole queue and can never fit.
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Largest payload the queue can ever accept.
        max: usize,
    },
    /// The queue stayed full for the whole submit timeout.
    QueueFull {
        /// How long the submission waited.
        waited: Duration,
    },
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoWorkers => write!(f, "pool has no worker threads"),
            Self::Shutdown => write!(f, "pool has shut down"),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "task payload of {size} bytes exceeds queue maximum of {max}")
            }
            Self::QueueFull { waited } => {
                write!(f, "task queue full after {}ms", waited.as_millis())
            }
        }
    }
}

impl Error for SubmitError {}
