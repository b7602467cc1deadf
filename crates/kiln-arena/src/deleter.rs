//! Intrusive deleter lists stored inside arena memory.
//!
//! Bump memory never runs destructors on its own. A managed allocation is
//! laid out as a [`Managed<T>`] node whose header links it into the
//! arena's current deleter list; tearing down the list (scope exit, reset
//! or drop) walks it newest-first and finalises each value in place.

use std::ptr::{self, NonNull};

/// Header shared by every managed node, regardless of payload type.
#[repr(C)]
pub(crate) struct DeleterLink {
    next: Option<NonNull<DeleterLink>>,
    finalize: unsafe fn(NonNull<DeleterLink>),
}

/// A managed value with its list header and optional cleanup callback.
///
/// `link` is the first field of a `repr(C)` struct, so a pointer to the
/// node and a pointer to its link are interchangeable.
#[repr(C)]
pub(crate) struct Managed<T> {
    link: DeleterLink,
    callback: Option<fn(&mut T)>,
    value: T,
}

impl<T> Managed<T> {
    pub(crate) fn new(value: T, callback: Option<fn(&mut T)>) -> Self {
        Self {
            link: DeleterLink {
                next: None,
                finalize: finalize::<T>,
            },
            callback,
            value,
        }
    }

    /// Pointer to the payload of a node.
    pub(crate) fn value_ptr(node: NonNull<Self>) -> NonNull<T> {
        // SAFETY: projecting a field of a non-null pointer stays non-null
        // and in bounds of the same allocation.
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*node.as_ptr()).value)) }
    }
}

unsafe fn finalize<T>(link: NonNull<DeleterLink>) {
    let node = link.cast::<Managed<T>>().as_ptr();
    // SAFETY: `link` heads a live `Managed<T>` written by `push`, and the
    // list owns it exclusively until this call.
    unsafe {
        if let Some(callback) = (*node).callback {
            callback(&mut (*node).value);
        }
        ptr::drop_in_place(ptr::addr_of_mut!((*node).value));
    }
}

/// Prepend `node` to the list headed by `head`, returning the new head.
///
/// # Safety
///
/// `node` must point to an initialised `Managed<T>` that stays in place
/// until the list is run.
pub(crate) unsafe fn push<T>(
    head: Option<NonNull<DeleterLink>>,
    node: NonNull<Managed<T>>,
) -> NonNull<DeleterLink> {
    let link = node.cast::<DeleterLink>();
    // SAFETY: the caller guarantees `node` is initialised and in place.
    unsafe { (*link.as_ptr()).next = head };
    link
}

/// Finalise every node of the list, newest first.
///
/// If a finaliser panics, the remaining nodes are still finalised while the
/// panic unwinds; a second panic during that aborts.
///
/// # Safety
///
/// Every node must have been linked by [`push`] and must not have been
/// run before. The memory backing the nodes must still be committed.
pub(crate) unsafe fn run(head: Option<NonNull<DeleterLink>>) -> usize {
    let mut rest = Remaining { head, count: 0 };
    // SAFETY: forwarded from the caller.
    unsafe { rest.finalize_all() };
    rest.count
}

struct Remaining {
    head: Option<NonNull<DeleterLink>>,
    count: usize,
}

impl Remaining {
    unsafe fn finalize_all(&mut self) {
        while let Some(link) = self.head {
            // SAFETY: nodes are live until finalised; `next` is read first,
            // so a panicking finaliser leaves `head` at the next node.
            unsafe {
                self.head = (*link.as_ptr()).next;
                ((*link.as_ptr()).finalize)(link);
            }
            self.count += 1;
        }
    }
}

impl Drop for Remaining {
    fn drop(&mut self) {
        // Non-empty only when unwinding out of a finaliser.
        // SAFETY: the unrun tail is still owned by this list.
        unsafe { self.finalize_all() };
    }
}
