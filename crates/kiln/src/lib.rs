//! Kiln: virtual-memory arenas, a byte ring buffer and a self-stealing
//! thread pool.
//!
//! This is the facade crate that re-exports the public API of the Kiln
//! sub-crates. For most users, adding `kiln` as a single dependency is
//! sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use kiln::prelude::*;
//!
//! let mut pool = ThreadPool::new(PoolConfig::new(2)).unwrap();
//! let total = Arc::new(AtomicU64::new(0));
//! let done = Arc::new(Future::new(pool.handle()));
//!
//! let (sum, signal) = (Arc::clone(&total), Arc::clone(&done));
//! pool.add(move |ctx| {
//!     // Temporary memory from this thread's scratch arena.
//!     let scope = ctx.scope();
//!     let squares = scope.alloc_slice_copy(&[1u64, 4, 9, 16]).unwrap();
//!     sum.fetch_add(squares.iter().sum(), Ordering::Relaxed);
//!     signal.signal();
//! })
//! .unwrap();
//!
//! done.wait(pool.context());
//! assert_eq!(total.load(Ordering::Relaxed), 30);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`primitives`] | `kiln-core` | `Allocator` trait, heap allocator, page and alignment helpers |
//! | [`ring`] | `kiln-ring` | `RingBuffer` |
//! | [`arena`] | `kiln-arena` | `Arena`, scopes and checkpoints |
//! | [`pool`] | `kiln-pool` | `ThreadPool`, `Future`, task submission |
//! | [`logging`] | (this crate) | `tracing` subscriber setup |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod logging;

/// Allocator contract and memory helpers (`kiln-core`).
pub use kiln_core as primitives;

/// Fixed-capacity circular byte queue (`kiln-ring`).
pub use kiln_ring as ring;

/// Virtual-memory bump arena (`kiln-arena`).
///
/// [`arena::Arena`] and [`arena::ArenaScope`] are also in the [`prelude`].
pub use kiln_arena as arena;

/// Worker-thread pool and futures (`kiln-pool`).
pub use kiln_pool as pool;

/// Common imports for typical Kiln usage.
///
/// ```rust
/// use kiln::prelude::*;
/// ```
pub mod prelude {
    // Memory
    pub use kiln_arena::{Arena, ArenaConfig, ArenaScope};
    pub use kiln_core::{Allocator, HeapAllocator};

    // Queue
    pub use kiln_ring::RingBuffer;

    // Pool
    pub use kiln_pool::{Future, PoolConfig, PoolHandle, Task, ThreadPool, WorkerContext};

    // Errors
    pub use kiln_arena::ArenaError;
    pub use kiln_pool::{PoolError, SubmitError};
    pub use kiln_ring::RingError;
}
