//! Ring buffer error types.

use std::error::Error;
use std::fmt;

/// Errors returned by [`RingBuffer`](crate::RingBuffer) operations.
///
/// A failed push or pop never modifies the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RingError {
    /// Requested capacity was zero or too large to round up to a power of two.
    InvalidCapacity {
        /// The capacity passed to the constructor.
        requested: usize,
    },
    /// Not enough free space for the push.
    Full {
        /// Bytes the push needed.
        requested: usize,
        /// Bytes currently free.
        available: usize,
    },
    /// Not enough stored bytes for the pop.
    Insufficient {
        /// Bytes the pop needed.
        requested: usize,
        /// Bytes currently stored.
        stored: usize,
    },
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCapacity { requested } => {
                write!(f, "invalid ring buffer capacity {requested}")
            }
            Self::Full {
                requested,
                available,
            } => {
                write!(
                    f,
                    "ring buffer full: push of {requested} bytes, {available} bytes free"
                )
            }
            Self::Insufficient { requested, stored } => {
                write!(
                    f,
                    "ring buffer underflow: pop of {requested} bytes, {stored} bytes stored"
                )
            }
        }
    }
}

impl Error for RingError {}
