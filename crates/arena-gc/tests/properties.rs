//! Property tests for the arena and the collector's bookkeeping.

mod common;

use std::collections::HashSet;

use arena_gc::{Arena, GcBase, GcKind};
use proptest::collection::vec;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arena_cursor_only_moves_forward(sizes in vec(1usize..20_000, 1..64)) {
        let page = 4096;
        let mut arena = Arena::reserve(16 << 20, page, 0, 1 << 20).unwrap();
        let mut last_end = arena.start();
        let mut last_frontier = arena.frontier();
        for size in sizes {
            let p = arena.alloc_from_arena(size).unwrap().as_ptr() as usize;
            prop_assert!(p >= last_end);
            prop_assert!(arena.cursor() == p + size);
            prop_assert!(arena.frontier() >= arena.cursor());
            prop_assert!(arena.frontier() >= last_frontier);
            prop_assert!(arena.contains(p));
            prop_assert!(arena.window_contains(p + size - 1));
            last_end = p + size;
            last_frontier = arena.frontier();
        }
        prop_assert_eq!(arena.start() % page, 0);
    }

    #[test]
    fn rooted_allocations_survive_and_the_rest_do_not(
        plan in vec((1usize..3000, any::<bool>()), 1..80),
    ) {
        let gc = common::mark_sweep();
        let mut handles = Vec::new();
        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for (size, keep) in plan {
            let p = gc.gc_alloc(size, GcKind::Untracked);
            if keep {
                handles.push(gc.new_root_handle(Some(p)));
                kept.push(p);
            } else {
                dropped.push(p);
            }
        }

        gc.run_collection();

        let live: HashSet<_> = kept.iter().map(|p| p.as_ptr() as usize).collect();
        prop_assert_eq!(live.len(), kept.len());
        for p in &kept {
            prop_assert!(gc.is_valid_gc_memory(p.as_ptr()));
        }
        for p in &dropped {
            prop_assert!(!gc.is_valid_gc_memory(p.as_ptr()));
        }
        prop_assert_eq!(gc.last_metrics().objects_surviving, kept.len());
        prop_assert_eq!(gc.last_metrics().objects_freed, dropped.len());
        drop(handles);
    }
}
