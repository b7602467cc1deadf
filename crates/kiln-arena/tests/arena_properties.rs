//! Property tests for the bump arena: allocation layout, checkpoint
//! idempotence and deleter ordering.

use std::sync::{Arc, Mutex};

use kiln_arena::{Arena, MIN_ALIGN};
use proptest::prelude::*;

const RESERVE: usize = 1 << 20;

// ── Allocation layout ────────────────────────────────────────────────

proptest! {
    #[test]
    fn allocations_are_disjoint_aligned_and_in_range(
        sizes in proptest::collection::vec(0usize..512, 1..64),
    ) {
        let arena = Arena::new(RESERVE, 4096).unwrap();
        let base = arena.base().as_ptr() as usize;
        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut last_pos = arena.pos();

        for &size in &sizes {
            let p = arena.malloc(size).unwrap().as_ptr() as usize;
            prop_assert_eq!(p % MIN_ALIGN, 0);
            prop_assert!(p >= base);
            prop_assert!(p + size <= base + arena.pos());
            prop_assert!(arena.pos() >= last_pos);
            prop_assert!(arena.pos() <= arena.committed());
            prop_assert!(arena.committed() <= arena.reserved());
            for &(start, len) in &spans {
                prop_assert!(p + size <= start || start + len <= p);
            }
            spans.push((p, size));
            last_pos = arena.pos();
        }
    }

    #[test]
    fn scope_leaves_arena_as_it_found_it(
        before in proptest::collection::vec(1usize..256, 0..16),
        inside in proptest::collection::vec(1usize..256, 0..16),
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut arena = Arena::new(RESERVE, 4096).unwrap();
        arena.alloc_managed(Logged { id: 0, log: Arc::clone(&log) }).unwrap();
        let mut last = None;
        for &size in &before {
            last = Some((arena.malloc(size).unwrap(), size));
        }
        let pos = arena.pos();
        {
            let scope = arena.scope();
            for &size in &inside {
                scope.malloc(size).unwrap();
            }
        }
        prop_assert_eq!(arena.pos(), pos);
        prop_assert_eq!(arena.scope_depth(), 0);
        // Values registered outside the scope outlive it.
        prop_assert!(log.lock().unwrap().is_empty());

        // The last allocation before the scope can still grow in place.
        if let Some((p, size)) = last {
            // SAFETY: `p` is the newest live allocation and spans `size` bytes.
            let q = unsafe { arena.realloc(Some(p), size, size + 64) }.unwrap();
            prop_assert_eq!(q, p);
        }

        // The next allocation lands right after everything still live.
        let pos = arena.pos();
        let next = arena.malloc(8).unwrap().as_ptr() as usize;
        prop_assert_eq!(next, arena.base().as_ptr() as usize + pos);

        drop(arena);
        prop_assert_eq!(&*log.lock().unwrap(), &vec![0]);
    }

    #[test]
    fn deleters_run_in_reverse_registration_order(count in 0usize..32) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut arena = Arena::new(RESERVE, 4096).unwrap();
        {
            let scope = arena.scope();
            for id in 0..count {
                scope.alloc_managed(Logged { id, log: Arc::clone(&log) }).unwrap();
            }
        }
        let expected: Vec<usize> = (0..count).rev().collect();
        prop_assert_eq!(&*log.lock().unwrap(), &expected);
    }
}

struct Logged {
    id: usize,
    log: Arc<Mutex<Vec<usize>>>,
}

impl Drop for Logged {
    fn drop(&mut self) {
        self.log.lock().unwrap().push(self.id);
    }
}

// ── Nested scopes ────────────────────────────────────────────────────

#[test]
fn nested_scopes_only_finalise_their_own_values() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut arena = Arena::new(RESERVE, 4096).unwrap();
    arena
        .alloc_managed(Logged {
            id: 0,
            log: Arc::clone(&log),
        })
        .unwrap();
    {
        let mut outer = arena.scope();
        outer
            .alloc_managed(Logged {
                id: 1,
                log: Arc::clone(&log),
            })
            .unwrap();
        {
            let inner = outer.scope();
            inner
                .alloc_managed(Logged {
                    id: 2,
                    log: Arc::clone(&log),
                })
                .unwrap();
            inner
                .alloc_managed(Logged {
                    id: 3,
                    log: Arc::clone(&log),
                })
                .unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec![3, 2]);
    }
    assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
    drop(arena);
    assert_eq!(*log.lock().unwrap(), vec![3, 2, 1, 0]);
}

#[test]
fn empty_scope_keeps_realloc_candidate() {
    let mut arena = Arena::new(RESERVE, 4096).unwrap();
    let p = arena.malloc(16).unwrap();
    {
        let _scope = arena.scope();
    }
    // SAFETY: `p` is the newest live allocation and spans 16 bytes.
    let q = unsafe { arena.realloc(Some(p), 16, 48) }.unwrap();
    assert_eq!(q, p);
    assert_eq!(arena.pos(), 48);
}

#[test]
fn raw_checkpoints_mirror_scopes() {
    let arena = Arena::new(RESERVE, 4096).unwrap();
    arena.malloc(40).unwrap();
    let state = arena.state_push();
    assert_eq!(state.pos(), 40);
    assert_eq!(state.depth(), 1);
    arena.malloc(4000).unwrap();
    // SAFETY: nothing allocated since the push is referenced.
    unsafe { arena.state_restore(state) };
    assert_eq!(arena.pos(), 40);
}

#[test]
fn arena_moves_between_threads() {
    let arena = Arena::new(RESERVE, 4096).unwrap();
    arena.malloc(16).unwrap();
    let pos = std::thread::spawn(move || {
        arena.malloc(16).unwrap();
        arena.pos()
    })
    .join()
    .unwrap();
    assert_eq!(pos, 32);
}
