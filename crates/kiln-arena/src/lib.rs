//! Virtual-memory bump arena with scoped checkpoints.
//!
//! An [`Arena`] reserves one contiguous range of address space up front and
//! commits physical pages lazily as its bump offset advances. Allocation is
//! a pointer bump; reclamation happens in bulk, either for the whole arena
//! ([`Arena::reset`]) or for everything allocated since a checkpoint
//! ([`Arena::scope`], or the raw [`Arena::state_push`] /
//! [`Arena::state_restore`] pair).
//!
//! # Architecture
//!
//! ```text
//! Arena
//! ├── reserved range   (PROT_NONE, never moves)
//! │   ├── committed    (read/write prefix, grows by doubling)
//! │   │   └── [0, pos) handed out
//! ├── last_alloc       (in-place realloc candidate)
//! └── deleter list     (managed values of the innermost scope, LIFO)
//! ```
//!
//! Values that need destruction are allocated with
//! [`Arena::alloc_managed`] or [`Arena::alloc_with_deleter`]; they are
//! finalised when the innermost enclosing scope closes.
//!
//! This crate requires a unix virtual-memory API (`mmap`, `mprotect`,
//! `madvise`, `munmap`).

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(not(unix))]
compile_error!("kiln-arena requires a unix virtual-memory API");

pub mod arena;
pub mod config;
mod deleter;
pub mod error;
pub mod scope;
mod vm;

pub use arena::{Arena, MIN_ALIGN};
pub use config::ArenaConfig;
pub use error::ArenaError;
pub use scope::{ArenaScope, ArenaState};
