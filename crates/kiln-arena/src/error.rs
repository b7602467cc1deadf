//! Arena-specific error types.

use std::error::Error;
use std::fmt;

/// Errors that can occur while creating or resizing an arena.
///
/// Ordinary allocation failure is not an error: `malloc` and friends return
/// `None` when the reservation is exhausted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// The requested sizes are unusable: a zero reservation, an initial
    /// commit larger than the reservation, or a size that overflows when
    /// rounded up to the page size.
    InvalidSize {
        /// Bytes of address space requested.
        reserve: usize,
        /// Bytes requested to be committed.
        commit: usize,
    },
    /// The operating system refused to reserve the address range.
    ReserveFailed {
        /// Page-aligned size of the failed reservation.
        size: usize,
        /// Raw OS error code.
        errno: i32,
    },
    /// The operating system refused to make a range readable and writable.
    CommitFailed {
        /// Offset of the range from the arena base.
        offset: usize,
        /// Length of the range in bytes.
        size: usize,
        /// Raw OS error code.
        errno: i32,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize { reserve, commit } => {
                write!(
                    f,
                    "invalid arena size: reserve {reserve} bytes, commit {commit} bytes"
                )
            }
            Self::ReserveFailed { size, errno } => {
                write!(f, "failed to reserve {size} bytes of address space (os error {errno})")
            }
            Self::CommitFailed {
                offset,
                size,
                errno,
            } => {
                write!(
                    f,
                    "failed to commit {size} bytes at offset {offset} (os error {errno})"
                )
            }
        }
    }
}

impl Error for ArenaError {}
