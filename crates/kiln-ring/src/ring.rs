//! Power-of-two circular byte buffer with vectored push and pop.

use crate::error::RingError;

/// Smallest backing buffer: one usable slot plus the reserved one.
const MIN_BACKING: usize = 2;

/// A fixed-capacity circular byte queue.
///
/// The backing buffer length is a power of two so that index wrapping is
/// a mask. One slot is kept in reserve, so the usable
/// [`capacity`](RingBuffer::capacity) is one less than the backing length
/// and "full" and "empty" are distinguishable from `len` alone.
///
/// Bytes come out in exactly the order they went in. A push or pop that
/// straddles the end of the backing buffer is split into two copies.
///
/// The element type defaults to `u8`. Any `Copy` byte-like type works;
/// `RingBuffer<MaybeUninit<u8>>` carries the raw bytes of arbitrary values,
/// padding included.
#[derive(Clone, Debug)]
pub struct RingBuffer<T: Copy = u8> {
    data: Box<[T]>,
    head: usize,
    tail: usize,
    len: usize,
}

impl RingBuffer<u8> {
    /// Create a ring buffer whose backing length is `capacity` rounded up to
    /// a power of two.
    ///
    /// Returns `Err(RingError::InvalidCapacity)` for zero or for a capacity
    /// whose next power of two does not fit in `usize`.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        Self::with_fill(capacity, 0)
    }
}

impl<T: Copy> RingBuffer<T> {
    /// Like [`RingBuffer::new`], for any element type. `fill` initialises
    /// the backing storage and is never observable through `pop`.
    pub fn with_fill(capacity: usize, fill: T) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::InvalidCapacity {
                requested: capacity,
            });
        }
        let backing = capacity
            .max(MIN_BACKING)
            .checked_next_power_of_two()
            .ok_or(RingError::InvalidCapacity {
                requested: capacity,
            })?;
        Ok(Self {
            data: vec![fill; backing].into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        })
    }

    /// Usable capacity in bytes (backing length minus the reserved slot).
    pub fn capacity(&self) -> usize {
        self.data.len() - 1
    }

    /// Number of bytes currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bytes that can be pushed before the buffer is full.
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Discard all stored bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    fn mask(&self) -> usize {
        self.data.len() - 1
    }

    /// Append `bytes`, failing without modification if they do not fit.
    pub fn push(&mut self, bytes: &[T]) -> Result<(), RingError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.check_free(bytes.len())?;
        self.push_no_checks(bytes);
        Ok(())
    }

    /// Append several spans as one logical push.
    ///
    /// Capacity is checked once for the combined length, so either every
    /// span is stored or none is. Equivalent to pushing the concatenation.
    pub fn push_vectored(&mut self, spans: &[&[T]]) -> Result<(), RingError> {
        let total: usize = spans.iter().map(|s| s.len()).sum();
        if total == 0 {
            return Ok(());
        }
        self.check_free(total)?;
        for span in spans {
            self.push_no_checks(span);
        }
        Ok(())
    }

    /// Remove `out.len()` bytes into `out`, failing without modification if
    /// fewer are stored.
    pub fn pop(&mut self, out: &mut [T]) -> Result<(), RingError> {
        if out.is_empty() {
            return Ok(());
        }
        self.check_stored(out.len())?;
        self.pop_no_checks(out);
        Ok(())
    }

    /// Fill several spans in order as one logical pop.
    pub fn pop_vectored(&mut self, spans: &mut [&mut [T]]) -> Result<(), RingError> {
        let total: usize = spans.iter().map(|s| s.len()).sum();
        if total == 0 {
            return Ok(());
        }
        self.check_stored(total)?;
        for span in spans.iter_mut() {
            self.pop_no_checks(span);
        }
        Ok(())
    }

    /// Copy the oldest `out.len()` bytes into `out` without consuming them.
    pub fn peek(&self, out: &mut [T]) -> Result<(), RingError> {
        self.check_stored(out.len())?;
        let n = out.len();
        let first = n.min(self.data.len() - self.head);
        out[..first].copy_from_slice(&self.data[self.head..self.head + first]);
        out[first..].copy_from_slice(&self.data[..n - first]);
        Ok(())
    }

    /// Append `bytes` without a capacity check.
    ///
    /// The caller must already have verified `bytes.len() <= self.free()`.
    /// Violating that is a logic error: it is caught by a debug assertion
    /// and otherwise corrupts the queue contents (never memory).
    pub fn push_no_checks(&mut self, bytes: &[T]) {
        debug_assert!(bytes.len() <= self.free(), "ring buffer push overflow");
        let n = bytes.len();
        let first = n.min(self.data.len() - self.tail);
        self.data[self.tail..self.tail + first].copy_from_slice(&bytes[..first]);
        self.data[..n - first].copy_from_slice(&bytes[first..]);
        self.tail = (self.tail + n) & self.mask();
        self.len += n;
    }

    /// Remove `out.len()` bytes without a length check.
    ///
    /// The caller must already have verified `out.len() <= self.len()`.
    pub fn pop_no_checks(&mut self, out: &mut [T]) {
        debug_assert!(out.len() <= self.len, "ring buffer pop underflow");
        let n = out.len();
        let first = n.min(self.data.len() - self.head);
        out[..first].copy_from_slice(&self.data[self.head..self.head + first]);
        out[first..].copy_from_slice(&self.data[..n - first]);
        self.head = (self.head + n) & self.mask();
        self.len -= n;
    }

    fn check_free(&self, requested: usize) -> Result<(), RingError> {
        if requested > self.free() {
            return Err(RingError::Full {
                requested,
                available: self.free(),
            });
        }
        Ok(())
    }

    fn check_stored(&self, requested: usize) -> Result<(), RingError> {
        if requested > self.len {
            return Err(RingError::Insufficient {
                requested,
                stored: self.len,
            });
        }
        Ok(())
    }
}
