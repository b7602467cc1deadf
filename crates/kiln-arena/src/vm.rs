//! Thin wrappers over the unix virtual-memory syscalls.
//!
//! A range is *reserved* (mapped `PROT_NONE`, no physical backing), then
//! *committed* in page-aligned pieces (`PROT_READ | PROT_WRITE`), optionally
//! *decommitted* (back to `PROT_NONE` with the pages discarded), and finally
//! *released* with `munmap`. All offsets and lengths passed here must be
//! page aligned.

use std::io;
use std::ptr::{self, NonNull};

#[cfg(target_os = "linux")]
const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
#[cfg(not(target_os = "linux"))]
const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

/// Reserve `len` bytes of inaccessible address space.
pub(crate) fn reserve(len: usize) -> io::Result<NonNull<u8>> {
    // SAFETY: an anonymous mapping with a null hint touches no existing
    // memory; failure is reported as MAP_FAILED.
    let p = unsafe { libc::mmap(ptr::null_mut(), len, libc::PROT_NONE, RESERVE_FLAGS, -1, 0) };
    if p == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(p.cast()).ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))
}

/// Make `[p, p + len)` readable and writable.
///
/// # Safety
///
/// The range must lie inside a mapping returned by [`reserve`].
pub(crate) unsafe fn commit(p: NonNull<u8>, len: usize) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }
    // SAFETY: the caller guarantees the range belongs to our mapping.
    let rc = unsafe { libc::mprotect(p.as_ptr().cast(), len, libc::PROT_READ | libc::PROT_WRITE) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Return `[p, p + len)` to the reserved state, discarding its contents.
///
/// # Safety
///
/// The range must lie inside a mapping returned by [`reserve`] and must
/// hold no live objects.
pub(crate) unsafe fn decommit(p: NonNull<u8>, len: usize) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }
    // SAFETY: the caller guarantees the range belongs to our mapping and
    // that nothing in it is referenced any more.
    unsafe {
        if libc::mprotect(p.as_ptr().cast(), len, libc::PROT_NONE) == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::madvise(p.as_ptr().cast(), len, libc::MADV_DONTNEED) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Unmap a whole reservation.
///
/// # Safety
///
/// `p` and `len` must describe exactly one mapping returned by [`reserve`],
/// and nothing may reference it afterwards.
pub(crate) unsafe fn release(p: NonNull<u8>, len: usize) -> io::Result<()> {
    // SAFETY: the caller guarantees exclusive ownership of the mapping.
    if unsafe { libc::munmap(p.as_ptr().cast(), len) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
