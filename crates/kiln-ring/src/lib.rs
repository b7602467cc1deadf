//! Fixed-capacity circular byte queue.
//!
//! [`RingBuffer`] stores raw bytes in a power-of-two backing buffer and
//! supports wrap-around pushes and pops, including vectored ("header plus
//! payload") operations that are checked and applied as one unit. It is
//! the task queue of the Kiln thread pool and carries no synchronisation
//! of its own: callers wrap it in a lock.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod ring;

pub use error::RingError;
pub use ring::RingBuffer;
