//! The allocator contract shared by arenas and the system heap.
//!
//! Every memory consumer in Kiln talks to an [`Allocator`] rather than to a
//! concrete arena, so the same code runs on a worker's scratch arena, on the
//! process heap, or on any future allocator. The contract mirrors the
//! classic four operations: `malloc`, `zalloc`, `realloc` and `free`.
//!
//! Allocation failure is an ordinary `None`, never a panic; the caller
//! decides whether to abort its own operation.

use std::ptr::{self, NonNull};

/// Four-operation raw allocator contract.
///
/// Returned pointers are aligned to at least 8 bytes. Implementations may
/// treat [`free`](Allocator::free) as a no-op (arenas reclaim in bulk).
pub trait Allocator {
    /// Allocate `size` uninitialised bytes.
    fn malloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Allocate `size` zero-filled bytes.
    fn zalloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Grow or shrink an allocation, preserving `min(old_size, new_size)`
    /// bytes. `None` as input behaves like [`malloc`](Allocator::malloc).
    ///
    /// # Safety
    ///
    /// `ptr`, when present, must have been returned by this allocator and
    /// must span at least `old_size` bytes.
    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>>;

    /// Release an allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and must not be used
    /// afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>);

    /// Allocate a copy of `bytes`.
    fn alloc_copy(&self, bytes: &[u8]) -> Option<NonNull<u8>> {
        let dst = self.malloc(bytes.len())?;
        // SAFETY: `dst` spans `bytes.len()` fresh bytes that cannot overlap
        // the borrowed source slice.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst.as_ptr(), bytes.len()) };
        Some(dst)
    }
}

impl<A: Allocator + ?Sized> Allocator for &A {
    fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).malloc(size)
    }

    fn zalloc(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).zalloc(size)
    }

    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded verbatim; the caller upholds the contract.
        unsafe { (**self).realloc(ptr, old_size, new_size) }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded verbatim; the caller upholds the contract.
        unsafe { (**self).free(ptr) }
    }
}

/// General-purpose allocator backed by the C heap (`malloc`/`free`).
///
/// Zero-sized requests are rounded up to one byte so that a successful
/// allocation always yields a unique, freeable pointer.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

impl HeapAllocator {
    /// Process-wide instance.
    pub const fn instance() -> &'static HeapAllocator {
        &HeapAllocator
    }
}

impl Allocator for HeapAllocator {
    fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: malloc has no preconditions; null is mapped to None.
        NonNull::new(unsafe { libc::malloc(size.max(1)) }.cast())
    }

    fn zalloc(&self, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: calloc has no preconditions; null is mapped to None.
        NonNull::new(unsafe { libc::calloc(1, size.max(1)) }.cast())
    }

    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        _old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let raw = ptr.map_or(ptr::null_mut(), |p| p.as_ptr().cast());
        // SAFETY: `raw` is null or a live pointer from this allocator.
        NonNull::new(unsafe { libc::realloc(raw, new_size.max(1)) }.cast())
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        // SAFETY: the caller guarantees `ptr` came from this allocator.
        unsafe { libc::free(ptr.as_ptr().cast()) }
    }
}
