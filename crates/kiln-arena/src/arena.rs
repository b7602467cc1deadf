//! The virtual-memory bump arena.

use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::io;
use std::ptr::{self, NonNull};

use kiln_core::mem::{align_up, checked_align_up, page_size};
use kiln_core::Allocator;
use tracing::{debug, error, trace, warn};

use crate::config::ArenaConfig;
use crate::deleter::{self, DeleterLink, Managed};
use crate::error::ArenaError;
use crate::scope::{ArenaScope, ArenaState};
use crate::vm;

/// Minimum alignment of every arena allocation.
pub const MIN_ALIGN: usize = 8;

/// `last_alloc` value meaning "no in-place realloc candidate".
const NO_ALLOC: usize = usize::MAX;

/// A bump allocator over one reserved range of virtual address space.
///
/// The whole range is reserved up front and never moves, so pointers handed
/// out stay valid until the arena is rewound past them. Physical pages are
/// committed lazily as the bump offset grows, doubling the committed prefix
/// each time. Exhausting the reservation is an ordinary allocation failure.
///
/// Allocation takes `&self`; rewinding ([`reset`](Arena::reset),
/// [`scope`](Arena::scope)) takes `&mut self`, so borrowed allocations
/// cannot outlive the memory behind them. An arena belongs to one thread at
/// a time: it is `Send` but not `Sync`.
pub struct Arena {
    base: NonNull<u8>,
    reserved: usize,
    committed: Cell<usize>,
    pos: Cell<usize>,
    last_alloc: Cell<usize>,
    deleters: Cell<Option<NonNull<DeleterLink>>>,
    depth: Cell<usize>,
}

// SAFETY: the arena exclusively owns its mapping, and managed values stored
// in it are required to be `Send`. The `Cell` fields keep it `!Sync`.
unsafe impl Send for Arena {}

impl Arena {
    /// Reserve `reserve` bytes of address space (rounded up to the page
    /// size) and eagerly commit the first `commit` bytes (also rounded up).
    pub fn new(reserve: usize, commit: usize) -> Result<Self, ArenaError> {
        let invalid = || ArenaError::InvalidSize { reserve, commit };
        if reserve == 0 || commit > reserve {
            return Err(invalid());
        }
        let page = page_size();
        let reserved = checked_align_up(reserve, page).ok_or_else(invalid)?;
        let base = vm::reserve(reserved).map_err(|err| ArenaError::ReserveFailed {
            size: reserved,
            errno: errno(&err),
        })?;

        let arena = Self {
            base,
            reserved,
            committed: Cell::new(0),
            pos: Cell::new(0),
            last_alloc: Cell::new(NO_ALLOC),
            deleters: Cell::new(None),
            depth: Cell::new(0),
        };
        if commit > 0 {
            let initial = align_up(commit, page);
            // SAFETY: `initial <= reserved`, so the range is inside the mapping.
            unsafe { vm::commit(base, initial) }.map_err(|err| ArenaError::CommitFailed {
                offset: 0,
                size: initial,
                errno: errno(&err),
            })?;
            arena.committed.set(initial);
        }
        debug!(
            reserved,
            committed = arena.committed.get(),
            "arena created"
        );
        Ok(arena)
    }

    /// Create an arena from a validated [`ArenaConfig`].
    pub fn with_config(config: &ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        Self::new(config.reserve, config.commit)
    }

    // ── Allocation ──────────────────────────────────────────────

    /// Allocate `size` uninitialised bytes, 8-byte aligned.
    ///
    /// Returns `None` once the reservation is exhausted or if the operating
    /// system refuses to commit more pages.
    pub fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.alloc_layout(Layout::from_size_align(size, MIN_ALIGN).ok()?)
    }

    /// Allocate `size` zero-filled bytes, 8-byte aligned.
    pub fn zalloc(&self, size: usize) -> Option<NonNull<u8>> {
        let p = self.malloc(size)?;
        // SAFETY: `p` spans `size` freshly committed bytes.
        unsafe { ptr::write_bytes(p.as_ptr(), 0, size) };
        Some(p)
    }

    /// Allocate for `layout`, honouring alignments above [`MIN_ALIGN`].
    pub fn alloc_layout(&self, layout: Layout) -> Option<NonNull<u8>> {
        let align = layout.align().max(MIN_ALIGN);
        let base = self.base.as_ptr() as usize;
        let start = checked_align_up(base.checked_add(self.pos.get())?, align)? - base;
        let new_pos = checked_align_up(start.checked_add(layout.size())?, MIN_ALIGN)?;
        self.grow_to(new_pos)?;
        self.pos.set(new_pos);
        self.last_alloc.set(start);
        // SAFETY: `start <= new_pos <= reserved`, inside (or one past) the mapping.
        Some(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) })
    }

    /// Move `value` into the arena. Its destructor never runs.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc<T>(&self, value: T) -> Option<&mut T> {
        let p = self.alloc_layout(Layout::new::<T>())?.cast::<T>();
        // SAFETY: `p` is fresh, aligned for `T` and borrowed only by us.
        unsafe {
            p.as_ptr().write(value);
            Some(&mut *p.as_ptr())
        }
    }

    /// Copy a slice into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> Option<&mut [T]> {
        let p = self.alloc_layout(Layout::array::<T>(src.len()).ok()?)?.cast::<T>();
        // SAFETY: `p` is fresh, aligned and spans `src.len()` elements.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), p.as_ptr(), src.len());
            Some(std::slice::from_raw_parts_mut(p.as_ptr(), src.len()))
        }
    }

    /// Move `value` into the arena and drop it when the innermost enclosing
    /// scope closes (or the arena is reset or dropped).
    ///
    /// If the allocation fails, `value` is dropped immediately.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_managed<T: Send + 'static>(&self, value: T) -> Option<&mut T> {
        self.alloc_node(value, None)
    }

    /// Like [`alloc_managed`](Arena::alloc_managed), but `deleter` is called
    /// on the value just before it is dropped.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_with_deleter<T: Send + 'static>(
        &self,
        value: T,
        deleter: fn(&mut T),
    ) -> Option<&mut T> {
        self.alloc_node(value, Some(deleter))
    }

    #[allow(clippy::mut_from_ref)]
    fn alloc_node<T: Send + 'static>(
        &self,
        value: T,
        callback: Option<fn(&mut T)>,
    ) -> Option<&mut T> {
        let node = self
            .alloc_layout(Layout::new::<Managed<T>>())?
            .cast::<Managed<T>>();
        // SAFETY: `node` is fresh and aligned for `Managed<T>`; it stays in
        // place until the current deleter list is run, which also rewinds
        // past it.
        unsafe {
            node.as_ptr().write(Managed::new(value, callback));
            self.deleters
                .set(Some(deleter::push(self.deleters.get(), node)));
            Some(&mut *Managed::value_ptr(node).as_ptr())
        }
    }

    /// Resize an allocation.
    ///
    /// `None` allocates fresh memory. The most recent allocation is resized
    /// in place by moving the bump offset. Otherwise shrinking returns `ptr`
    /// unchanged and growing copies into a new allocation.
    ///
    /// # Safety
    ///
    /// `ptr`, when present, must come from this arena, must span at least
    /// `old_size` bytes, and must not have been rewound past.
    pub unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let Some(p) = ptr else {
            return self.malloc(new_size);
        };
        let offset = (p.as_ptr() as usize).wrapping_sub(self.base.as_ptr() as usize);
        if offset == self.last_alloc.get() {
            let new_pos = checked_align_up(offset.checked_add(new_size)?, MIN_ALIGN)?;
            self.grow_to(new_pos)?;
            self.pos.set(new_pos);
            return Some(p);
        }
        if new_size <= old_size {
            return Some(p);
        }
        let fresh = self.malloc(new_size)?;
        // SAFETY: `p` spans `old_size` bytes and `fresh` is a new, disjoint
        // allocation of `new_size > old_size` bytes.
        unsafe { ptr::copy_nonoverlapping(p.as_ptr(), fresh.as_ptr(), old_size) };
        Some(fresh)
    }

    /// Commit enough pages for the bump offset to reach `new_pos`.
    fn grow_to(&self, new_pos: usize) -> Option<()> {
        if new_pos > self.reserved {
            return None;
        }
        let committed = self.committed.get();
        if new_pos <= committed {
            return Some(());
        }
        let target = align_up(new_pos, page_size())
            .max(committed.saturating_mul(2))
            .min(self.reserved);
        // SAFETY: `committed < target <= reserved`; the range is ours.
        let result = unsafe { vm::commit(self.at(committed), target - committed) };
        if let Err(err) = result {
            warn!(
                offset = committed,
                size = target - committed,
                %err,
                "arena commit failed"
            );
            return None;
        }
        trace!(from = committed, to = target, "arena committed pages");
        self.committed.set(target);
        Some(())
    }

    fn at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.reserved);
        // SAFETY: offsets up to `reserved` stay inside (or one past) the mapping.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    // ── Scopes ──────────────────────────────────────────────────

    /// Open an RAII scope: everything allocated through it is reclaimed,
    /// and its managed values dropped, when the guard is dropped.
    pub fn scope(&mut self) -> ArenaScope<'_> {
        ArenaScope::new(self)
    }

    /// Record a checkpoint and start a fresh deleter list.
    ///
    /// Prefer [`scope`](Arena::scope). The raw form exists for callers that
    /// need to keep using the arena through `&mut` while the checkpoint is
    /// open, such as a worker decoding a task payload into scratch memory.
    pub fn state_push(&self) -> ArenaState {
        let depth = self.depth.get() + 1;
        let state = ArenaState {
            pos: self.pos.get(),
            last_alloc: self.last_alloc.get(),
            deleters: self.deleters.take(),
            depth,
        };
        // Growing an allocation from before the checkpoint in place would
        // be undone by the restore.
        self.last_alloc.set(NO_ALLOC);
        self.depth.set(depth);
        state
    }

    /// Run the deleters registered since `state` was pushed, newest first,
    /// then rewind to it.
    ///
    /// # Panics
    ///
    /// Panics if `state` is not the innermost open checkpoint.
    ///
    /// # Safety
    ///
    /// No reference or pointer into memory allocated since the push may be
    /// used afterwards.
    pub unsafe fn state_restore(&self, state: ArenaState) {
        assert_eq!(
            self.depth.get(),
            state.depth,
            "arena checkpoints must be restored innermost first"
        );
        // Rewind first so a panicking finaliser still leaves the checkpoint
        // closed.
        let pending = self.deleters.take();
        self.pos.set(state.pos);
        self.last_alloc.set(state.last_alloc);
        self.deleters.set(state.deleters);
        self.depth.set(state.depth - 1);
        // SAFETY: the detached list holds only nodes allocated since the
        // push; rewinding does not decommit, so they are still in place.
        unsafe { deleter::run(pending) };
    }

    // ── Reset ───────────────────────────────────────────────────

    /// Run all pending deleters and rewind to the start. Committed pages
    /// are kept.
    ///
    /// # Panics
    ///
    /// Panics if a raw checkpoint from [`state_push`](Arena::state_push) is
    /// still open.
    pub fn reset(&mut self) {
        assert_eq!(self.depth.get(), 0, "arena reset inside an open checkpoint");
        let pending = self.deleters.take();
        self.pos.set(0);
        self.last_alloc.set(NO_ALLOC);
        // SAFETY: `&mut self` proves no allocation is still borrowed, and
        // the rewound pages stay committed.
        unsafe { deleter::run(pending) };
    }

    /// Finalise the managed values of the innermost scope now, without
    /// rewinding. Returns how many ran.
    ///
    /// Their memory stays allocated until the scope closes or the arena is
    /// reset.
    pub fn run_deleters(&mut self) -> usize {
        let pending = self.deleters.take();
        // SAFETY: `&mut self` proves no allocation is still borrowed; the
        // list is detached, so each node is finalised exactly once.
        unsafe { deleter::run(pending) }
    }

    /// [`reset`](Arena::reset) and return every committed page to the
    /// operating system.
    pub fn reset_decommit(&mut self) {
        self.reset();
        let committed = self.committed.get();
        // SAFETY: nothing lives in the arena after the reset.
        if let Err(err) = unsafe { vm::decommit(self.base, committed) } {
            fatal("decommit", &err);
        }
        self.committed.set(0);
        trace!(released = committed, "arena decommitted");
    }

    /// [`reset`](Arena::reset) and resize the committed prefix to exactly
    /// `pages` pages, committing or decommitting as needed.
    pub fn reset_to_page(&mut self, pages: usize) -> Result<(), ArenaError> {
        let target = pages
            .checked_mul(page_size())
            .filter(|&bytes| bytes <= self.reserved)
            .ok_or(ArenaError::InvalidSize {
                reserve: self.reserved,
                commit: pages.saturating_mul(page_size()),
            })?;
        self.reset();
        let committed = self.committed.get();
        if committed > target {
            // SAFETY: nothing lives in the arena after the reset.
            if let Err(err) = unsafe { vm::decommit(self.at(target), committed - target) } {
                fatal("decommit", &err);
            }
        } else if committed < target {
            // SAFETY: `committed < target <= reserved`; the range is ours.
            unsafe { vm::commit(self.at(committed), target - committed) }.map_err(|err| {
                ArenaError::CommitFailed {
                    offset: committed,
                    size: target - committed,
                    errno: errno(&err),
                }
            })?;
        }
        self.committed.set(target);
        Ok(())
    }

    // ── Accessors ───────────────────────────────────────────────

    /// Current bump offset in bytes.
    pub fn pos(&self) -> usize {
        self.pos.get()
    }

    /// Bytes of the reservation currently backed by readable pages.
    pub fn committed(&self) -> usize {
        self.committed.get()
    }

    /// Total reserved bytes (page aligned).
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Bytes that can still be handed out before the reservation is full.
    pub fn remaining(&self) -> usize {
        self.reserved - self.pos.get()
    }

    /// Start of the reserved range.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Whether `ptr` points into memory currently handed out.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= base && addr < base + self.pos.get()
    }

    /// Number of open checkpoints.
    pub fn scope_depth(&self) -> usize {
        self.depth.get()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no allocation is still borrowed.
        unsafe { deleter::run(self.deleters.take()) };
        // SAFETY: `base`/`reserved` describe our mapping, unused from here on.
        if let Err(err) = unsafe { vm::release(self.base, self.reserved) } {
            fatal("release", &err);
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("pos", &self.pos.get())
            .field("committed", &self.committed.get())
            .field("reserved", &self.reserved)
            .field("scope_depth", &self.depth.get())
            .finish()
    }
}

impl Allocator for Arena {
    fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        Arena::malloc(self, size)
    }

    fn zalloc(&self, size: usize) -> Option<NonNull<u8>> {
        Arena::zalloc(self, size)
    }

    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded verbatim; the caller upholds the contract.
        unsafe { Arena::realloc(self, ptr, old_size, new_size) }
    }

    unsafe fn free(&self, _ptr: NonNull<u8>) {}
}

fn errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(0)
}

fn fatal(op: &str, err: &io::Error) -> ! {
    error!(op, %err, "arena virtual-memory operation failed");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::mem::MIB;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn arena() -> Arena {
        Arena::new(MIB, 4096).unwrap()
    }

    #[test]
    fn formatted_write_reads_back_and_pos_is_aligned() {
        let arena = Arena::new(60 * MIB, 4096).unwrap();
        let p = arena.malloc(100).unwrap();
        // SAFETY: `p` spans 100 writable bytes.
        let buf = unsafe { std::slice::from_raw_parts_mut(p.as_ptr(), 100) };
        let mut cursor = &mut buf[..];
        write!(cursor, "{}", "HELLO").unwrap();
        assert_eq!(&buf[..5], b"HELLO");
        assert_eq!(arena.pos(), 104);
    }

    #[test]
    fn sizes_round_up_to_pages() {
        let arena = Arena::new(1, 1).unwrap();
        assert_eq!(arena.reserved(), page_size());
        assert_eq!(arena.committed(), page_size());
    }

    #[test]
    fn invalid_sizes_rejected() {
        assert!(matches!(
            Arena::new(0, 0),
            Err(ArenaError::InvalidSize { .. })
        ));
        assert!(matches!(
            Arena::new(4096, 8192),
            Err(ArenaError::InvalidSize { .. })
        ));
        assert!(matches!(
            Arena::new(usize::MAX, 0),
            Err(ArenaError::InvalidSize { .. })
        ));
    }

    #[test]
    fn zero_commit_defers_to_first_allocation() {
        let arena = Arena::new(MIB, 0).unwrap();
        assert_eq!(arena.committed(), 0);
        let p = arena.malloc(10).unwrap();
        // SAFETY: `p` spans 10 committed bytes.
        unsafe { p.as_ptr().write(1) };
        assert_eq!(arena.committed(), page_size());
    }

    #[test]
    fn allocations_are_eight_byte_aligned() {
        let arena = arena();
        for size in [1, 3, 7, 9, 17] {
            let p = arena.malloc(size).unwrap();
            assert_eq!(p.as_ptr() as usize % MIN_ALIGN, 0);
        }
    }

    #[test]
    fn layout_alignment_honoured() {
        let arena = arena();
        arena.malloc(1).unwrap();
        let p = arena.alloc_layout(Layout::from_size_align(64, 256).unwrap()).unwrap();
        assert_eq!(p.as_ptr() as usize % 256, 0);
    }

    #[test]
    fn commit_doubles() {
        let page = page_size();
        let arena = Arena::new(64 * page, page).unwrap();
        arena.malloc(page + 1).unwrap();
        assert_eq!(arena.committed(), 2 * page);
        arena.malloc(page).unwrap();
        assert_eq!(arena.committed(), 4 * page);
    }

    #[test]
    fn commit_capped_at_reservation() {
        let page = page_size();
        let arena = Arena::new(3 * page, page).unwrap();
        arena.malloc(2 * page + 8).unwrap();
        assert_eq!(arena.committed(), 3 * page);
    }

    #[test]
    fn exhaustion_returns_none() {
        let page = page_size();
        let arena = Arena::new(page, page).unwrap();
        assert!(arena.malloc(page).is_some());
        assert!(arena.malloc(1).is_none());
        assert_eq!(arena.pos(), page);
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn zalloc_zeroes_reused_memory() {
        let mut arena = arena();
        let p = arena.malloc(64).unwrap();
        // SAFETY: `p` spans 64 writable bytes.
        unsafe { ptr::write_bytes(p.as_ptr(), 0xFF, 64) };
        arena.reset();
        let z = arena.zalloc(64).unwrap();
        assert_eq!(z, p);
        // SAFETY: `z` spans 64 initialised bytes.
        let bytes = unsafe { std::slice::from_raw_parts(z.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn realloc_last_allocation_grows_in_place() {
        let arena = arena();
        let p = arena.malloc(16).unwrap();
        // SAFETY: `p` is the most recent allocation of 16 bytes.
        let q = unsafe { arena.realloc(Some(p), 16, 48) }.unwrap();
        assert_eq!(p, q);
        assert_eq!(arena.pos(), 48);
    }

    #[test]
    fn realloc_older_allocation_copies() {
        let arena = arena();
        let p = arena.alloc_copy(b"abcdefgh").unwrap();
        arena.malloc(8).unwrap();
        // SAFETY: `p` spans eight bytes from this arena.
        let q = unsafe { arena.realloc(Some(p), 8, 32) }.unwrap();
        assert_ne!(p, q);
        // SAFETY: the first eight bytes were copied.
        let bytes = unsafe { std::slice::from_raw_parts(q.as_ptr(), 8) };
        assert_eq!(bytes, b"abcdefgh");
    }

    #[test]
    fn realloc_shrink_of_older_allocation_is_identity() {
        let arena = arena();
        let p = arena.malloc(32).unwrap();
        arena.malloc(8).unwrap();
        let pos = arena.pos();
        // SAFETY: `p` spans 32 bytes from this arena.
        let q = unsafe { arena.realloc(Some(p), 32, 8) }.unwrap();
        assert_eq!(p, q);
        assert_eq!(arena.pos(), pos);
    }

    #[test]
    fn realloc_none_allocates() {
        let arena = arena();
        // SAFETY: no pointer is passed.
        assert!(unsafe { arena.realloc(None, 0, 24) }.is_some());
        assert_eq!(arena.pos(), 24);
    }

    #[test]
    fn realloc_inside_scope_does_not_grow_outer_allocation() {
        let mut arena = arena();
        let p = arena.malloc(8).unwrap();
        {
            let scope = arena.scope();
            // SAFETY: `p` is a live 8-byte allocation from before the scope.
            let q = unsafe { scope.realloc(Some(p), 8, 64) }.unwrap();
            assert_ne!(p, q);
        }
        assert_eq!(arena.pos(), 8);
    }

    #[test]
    fn typed_allocations() {
        let arena = arena();
        let x = arena.alloc(41u64).unwrap();
        *x += 1;
        let xs = arena.alloc_slice_copy(&[1u32, 2, 3]).unwrap();
        xs[2] = 9;
        assert_eq!(*x, 42);
        assert_eq!(xs, &[1, 2, 9]);
        assert!(arena.contains((x as *const u64).cast()));
    }

    #[test]
    fn scope_rewinds_and_nests() {
        let mut arena = arena();
        arena.malloc(8).unwrap();
        {
            let mut outer = arena.scope();
            outer.malloc(100).unwrap();
            assert_eq!(outer.scope_depth(), 1);
            {
                let inner = outer.scope();
                inner.malloc(1000).unwrap();
                assert_eq!(inner.scope_depth(), 2);
                assert_eq!(inner.start_pos(), 112);
            }
            assert_eq!(outer.pos(), 112);
        }
        assert_eq!(arena.pos(), 8);
        assert_eq!(arena.scope_depth(), 0);
    }

    #[derive(Debug)]
    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn managed_values_drop_at_scope_exit_only() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut arena = arena();
        arena.alloc_managed(Tracked(Arc::clone(&drops))).unwrap();
        {
            let scope = arena.scope();
            scope.alloc_managed(Tracked(Arc::clone(&drops))).unwrap();
            scope.alloc_managed(Tracked(Arc::clone(&drops))).unwrap();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
        arena.reset();
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn managed_values_drop_with_arena() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let arena = arena();
            arena.alloc_managed(Tracked(Arc::clone(&drops))).unwrap();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    static DELETED: AtomicUsize = AtomicUsize::new(0);

    fn count_delete(v: &mut u32) {
        DELETED.fetch_add(*v as usize, Ordering::SeqCst);
    }

    #[test]
    fn deleter_callback_runs() {
        let mut arena = arena();
        {
            let scope = arena.scope();
            scope.alloc_with_deleter(5u32, count_delete).unwrap();
        }
        assert_eq!(DELETED.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn scope_restored_on_unwind() {
        let mut arena = arena();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let scope = arena.scope();
            scope.malloc(64).unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(arena.pos(), 0);
        assert_eq!(arena.scope_depth(), 0);
    }

    struct Bomb(Arc<AtomicUsize>);

    impl Drop for Bomb {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("managed value failed to drop");
        }
    }

    #[test]
    fn scope_closed_when_finaliser_panics() {
        let mut arena = arena();
        let outer = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(AtomicUsize::new(0));
        let bombs = Arc::new(AtomicUsize::new(0));
        arena.alloc_managed(Tracked(Arc::clone(&outer))).unwrap();
        let pos = arena.pos();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let scope = arena.scope();
            scope.alloc_managed(Tracked(Arc::clone(&inner))).unwrap();
            scope.alloc_managed(Bomb(Arc::clone(&bombs))).unwrap();
            scope.malloc(200).unwrap();
        }));
        assert!(result.is_err());
        assert_eq!(bombs.load(Ordering::SeqCst), 1);
        // The value registered before the bomb still ran.
        assert_eq!(inner.load(Ordering::SeqCst), 1);
        assert_eq!(arena.pos(), pos);
        assert_eq!(arena.scope_depth(), 0);

        // The outer list survived: reset finalises it.
        assert_eq!(outer.load(Ordering::SeqCst), 0);
        arena.reset();
        assert_eq!(outer.load(Ordering::SeqCst), 1);
        assert_eq!(arena.pos(), 0);
    }

    #[test]
    fn run_deleters_keeps_memory() {
        let mut arena = arena();
        let drops = Arc::new(AtomicUsize::new(0));
        arena.alloc_managed(Tracked(Arc::clone(&drops))).unwrap();
        arena.alloc_managed(Tracked(Arc::clone(&drops))).unwrap();
        let pos = arena.pos();
        assert_eq!(arena.run_deleters(), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert_eq!(arena.pos(), pos);
        assert_eq!(arena.run_deleters(), 0);
        arena.reset();
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[should_panic(expected = "innermost first")]
    fn out_of_order_restore_panics() {
        let arena = arena();
        let outer = arena.state_push();
        let _inner = arena.state_push();
        // SAFETY: nothing was allocated; only the ordering check is exercised.
        unsafe { arena.state_restore(outer) };
    }

    #[test]
    fn reset_decommit_releases_pages() {
        let mut arena = arena();
        arena.malloc(3 * page_size()).unwrap();
        arena.reset_decommit();
        assert_eq!(arena.committed(), 0);
        assert_eq!(arena.pos(), 0);
        let p = arena.zalloc(16).unwrap();
        // SAFETY: recommitted memory is readable.
        assert_eq!(unsafe { p.as_ptr().read() }, 0);
    }

    #[test]
    fn reset_to_page_sets_commit_exactly() {
        let page = page_size();
        let mut arena = Arena::new(16 * page, page).unwrap();
        arena.reset_to_page(4).unwrap();
        assert_eq!(arena.committed(), 4 * page);
        arena.malloc(8).unwrap();
        arena.reset_to_page(1).unwrap();
        assert_eq!(arena.committed(), page);
        assert_eq!(arena.pos(), 0);
        assert!(arena.reset_to_page(17).is_err());
    }

    #[test]
    fn usable_through_allocator_trait() {
        let arena = arena();
        let alloc: &dyn Allocator = &arena;
        let p = alloc.alloc_copy(b"kiln").unwrap();
        // SAFETY: `free` is a no-op for arenas.
        unsafe { alloc.free(p) };
        assert!(arena.contains(p.as_ptr()));
    }
}
