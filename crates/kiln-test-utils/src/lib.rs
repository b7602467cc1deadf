//! Test fixtures shared by Kiln's tests and benchmarks.
//!
//! Provides small-footprint pool configurations and [`Task`] implementations
//! that record how often, and on which threads, they ran.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use kiln_pool::{PoolConfig, ThreadPool, Task, WorkerContext};

/// Arena reservation used by test pools: enough for large payloads without
/// reserving 64 MiB of address space per thread.
pub const TEST_ARENA_RESERVE: usize = 1 << 20;

/// A pool configuration with `threads` workers and small arenas.
pub fn small_pool_config(threads: usize) -> PoolConfig {
    let mut config = PoolConfig::new(threads);
    config.arena_reserve = TEST_ARENA_RESERVE;
    config
}

/// Build a pool from [`small_pool_config`].
///
/// # Panics
///
/// Panics if the pool cannot start.
pub fn small_pool(threads: usize) -> ThreadPool {
    match ThreadPool::new(small_pool_config(threads)) {
        Ok(pool) => pool,
        Err(err) => panic!("failed to start {threads}-thread test pool: {err}"),
    }
}

/// Worker counts worth sweeping: 1, 2 and every core count up to
/// `logical_cores()` (capped at 8 to keep test time bounded).
pub fn thread_counts() -> Vec<usize> {
    let max = kiln_pool::logical_cores().clamp(2, 8);
    (1..=max).collect()
}

/// Counts its executions.
#[derive(Debug, Default)]
pub struct CountingTask {
    runs: AtomicUsize,
}

impl CountingTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the task has run.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Task for CountingTask {
    fn run(&self, _ctx: &mut WorkerContext) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records the index of every thread that ran it.
#[derive(Debug, Default)]
pub struct RecordingTask {
    seen: Mutex<Vec<usize>>,
}

impl RecordingTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Thread indices, in execution order.
    pub fn seen(&self) -> Vec<usize> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Task for RecordingTask {
    fn run(&self, ctx: &mut WorkerContext) {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(ctx.thread_index());
    }
}
