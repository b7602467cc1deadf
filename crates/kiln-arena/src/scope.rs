//! Checkpoints and RAII scopes over an [`Arena`].

use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::arena::Arena;
use crate::deleter::DeleterLink;

/// A saved arena position, produced by [`Arena::state_push`].
///
/// Holds the bump offset, the in-place-realloc candidate and the enclosing
/// scope's deleter list. Consumed by [`Arena::state_restore`], which runs
/// every deleter registered since the push and rewinds the arena.
#[must_use = "an arena state must be restored"]
pub struct ArenaState {
    pub(crate) pos: usize,
    pub(crate) last_alloc: usize,
    pub(crate) deleters: Option<NonNull<DeleterLink>>,
    pub(crate) depth: usize,
}

impl ArenaState {
    /// Bump offset the arena returns to on restore.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Nesting depth of this checkpoint (1 for the outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl fmt::Debug for ArenaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaState")
            .field("pos", &self.pos)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// RAII guard for a temporary arena region.
///
/// Created by [`Arena::scope`] or [`ArenaScope::scope`]. Allocations made
/// through the guard borrow it, so they cannot outlive it. Dropping the
/// guard (including during unwinding) runs the deleters registered inside
/// the scope, newest first, and rewinds the arena to where it was.
///
/// ```
/// use kiln_arena::Arena;
///
/// let mut arena = Arena::new(1 << 20, 4096).unwrap();
/// let before = arena.pos();
/// {
///     let scope = arena.scope();
///     let buf = scope.alloc_slice_copy(b"scratch").unwrap();
///     assert_eq!(buf, b"scratch");
/// }
/// assert_eq!(arena.pos(), before);
/// ```
#[must_use = "dropping the scope immediately rewinds the arena"]
pub struct ArenaScope<'a> {
    arena: &'a mut Arena,
    state: Option<ArenaState>,
}

impl<'a> ArenaScope<'a> {
    pub(crate) fn new(arena: &'a mut Arena) -> Self {
        let state = arena.state_push();
        Self {
            arena,
            state: Some(state),
        }
    }

    /// Open a nested scope. The outer scope is unusable until it closes.
    pub fn scope(&mut self) -> ArenaScope<'_> {
        ArenaScope::new(self.arena)
    }

    /// Bump offset this scope rewinds to.
    pub fn start_pos(&self) -> usize {
        self.state.as_ref().map_or(self.arena.pos(), ArenaState::pos)
    }
}

impl Deref for ArenaScope<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        self.arena
    }
}

impl Drop for ArenaScope<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            // SAFETY: every allocation made through this guard borrowed it,
            // and those borrows have ended now that it is being dropped.
            // Nested guards borrow this one mutably, so they are gone too.
            unsafe { self.arena.state_restore(state) };
        }
    }
}

impl fmt::Debug for ArenaScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaScope")
            .field("start_pos", &self.start_pos())
            .field("arena", &*self.arena)
            .finish()
    }
}
