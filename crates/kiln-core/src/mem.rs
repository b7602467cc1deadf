//! Page-size queries and power-of-two alignment arithmetic.

use std::sync::OnceLock;

/// One kibibyte.
pub const KIB: usize = 1024;
/// One mebibyte.
pub const MIB: usize = KIB * KIB;

/// Page size assumed when the platform cannot be queried.
const FALLBACK_PAGE_SIZE: usize = 4 * KIB;

/// The virtual-memory page size of the running system.
///
/// Queried once via `sysconf(_SC_PAGESIZE)` and cached for the lifetime
/// of the process.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(query_page_size)
}

#[cfg(unix)]
fn query_page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 && is_power_of_two(size as usize) {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(not(unix))]
fn query_page_size() -> usize {
    FALLBACK_PAGE_SIZE
}

/// Whether `x` is a non-zero power of two.
pub const fn is_power_of_two(x: usize) -> bool {
    x != 0 && x & (x - 1) == 0
}

/// Round `value` up to the next multiple of `align`.
///
/// `align` must be a power of two. Wraps on overflow in release builds;
/// use [`checked_align_up`] for untrusted sizes.
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(is_power_of_two(align));
    value.wrapping_add(align - 1) & !(align - 1)
}

/// Round `value` up to the next multiple of `align`, or `None` on overflow.
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(is_power_of_two(align));
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}
