//! Allocator contract and memory helpers for the Kiln runtime.
//!
//! This is the leaf crate of the Kiln workspace. It defines the
//! four-operation [`Allocator`] trait shared by every memory consumer
//! (arenas, the system heap, and anything built on top of them), a thin
//! [`HeapAllocator`] over the C heap, and the page-size and alignment
//! arithmetic used by the virtual-memory arena.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod alloc;
pub mod mem;

pub use alloc::{Allocator, HeapAllocator};
pub use mem::{align_up, checked_align_up, is_power_of_two, page_size};
