//! Fixed worker-thread pool with by-value task payloads.
//!
//! Tasks are closures (or shared [`Task`] objects) encoded into one bounded
//! byte queue: a small header followed by the closure's captured state.
//! Submitting a task never allocates. Workers decode small payloads onto
//! the stack and large ones into their private scratch [`Arena`](kiln_arena::Arena).
//!
//! Every task receives a [`WorkerContext`]: the executing thread's scratch
//! arena, its index and a [`PoolHandle`] for submitting follow-up work.
//! Threads that wait ([`ThreadPool::wait`], [`Future::wait`]) run queued
//! tasks themselves before sleeping, so waiting from inside a task cannot
//! starve the pool.
//!
//! # Architecture
//!
//! ```text
//! ThreadPool (owner, index 0)
//! ├── PoolHandle ── Arc<Shared>
//! │                 ├── Mutex<RingBuffer>   encoded tasks
//! │                 ├── work_available      wakes idle workers
//! │                 ├── drained             wakes waiters
//! │                 └── active / shutdown   atomics
//! ├── owner WorkerContext (arena)
//! └── kiln-worker-1 ..= kiln-worker-N, each with its own WorkerContext
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod context;
pub mod error;
pub mod future;
pub mod pool;
pub mod stats;
pub mod task;

pub use config::{logical_cores, optimal_thread_count, PoolConfig, WorkerHook};
pub use context::WorkerContext;
pub use error::{ConfigError, PoolError, SubmitError};
pub use future::Future;
pub use pool::{PoolHandle, ShutdownReport, ThreadPool};
pub use stats::PoolStats;
pub use task::{RawTaskFn, Task, INLINE_CAPACITY, PAYLOAD_ALIGN};
