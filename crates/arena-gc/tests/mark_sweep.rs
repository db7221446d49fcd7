//! Reachability, finalization and traversal behavior of the mark-sweep collector.

mod common;

use std::mem::size_of;

use arena_gc::heap::Heap;
use arena_gc::{GcBase, GcKind};
use common::{
    finalized, mark_sweep, new_node, new_node_of_kind, reset_counters, set_left, set_right,
    static_classes, value, visits,
};

#[test]
fn test_unreachable_objects_are_freed_and_reachable_ones_kept() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let root = new_node(&gc, classes.node, 1);
    let child = new_node(&gc, classes.node, 2);
    let garbage = new_node(&gc, classes.node, 3);
    set_left(root, Some(child));
    let handle = gc.new_root_handle(Some(root));

    gc.run_collection();

    assert!(gc.is_valid_gc_object(root.as_ptr()));
    assert!(gc.is_valid_gc_object(child.as_ptr()));
    assert!(!gc.is_valid_gc_memory(garbage.as_ptr()));
    assert_eq!(value(child), 2);
    assert_eq!(finalized(), 1);

    let metrics = gc.last_metrics();
    assert_eq!(metrics.objects_freed, 1);
    assert_eq!(metrics.objects_surviving, 2);
    assert_eq!(metrics.total_collections, 1);
    drop(handle);
}

#[test]
fn test_cycles_are_collected_once_unrooted() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let a = new_node(&gc, classes.node, 1);
    let b = new_node(&gc, classes.node, 2);
    set_left(a, Some(b));
    set_left(b, Some(a));
    let handle = gc.new_root_handle(Some(a));

    gc.run_collection();
    assert!(gc.is_valid_gc_object(a.as_ptr()));
    assert!(gc.is_valid_gc_object(b.as_ptr()));
    assert_eq!(finalized(), 0);

    handle.set(None);
    gc.run_collection();
    assert!(!gc.is_valid_gc_memory(a.as_ptr()));
    assert!(!gc.is_valid_gc_memory(b.as_ptr()));
    assert_eq!(finalized(), 2);
}

#[test]
fn test_finalizers_run_at_most_once() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    for i in 0..100 {
        let _ = new_node(&gc, classes.node, i);
    }
    gc.run_collection();
    assert_eq!(finalized(), 100);
    gc.run_collection();
    gc.run_collection();
    assert_eq!(finalized(), 100);
}

#[test]
fn test_shared_children_are_visited_once_per_cycle() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let shared = new_node(&gc, classes.node, 0);
    let a = new_node(&gc, classes.node, 1);
    let b = new_node(&gc, classes.node, 2);
    set_left(a, Some(shared));
    set_right(a, Some(shared));
    set_left(b, Some(shared));
    set_right(shared, Some(a));

    let h1 = gc.new_root_handle(Some(a));
    let h2 = gc.new_root_handle(Some(b));
    let h3 = gc.new_root_handle(Some(a));
    gc.register_permanent_root(shared, false);

    gc.run_collection();
    assert_eq!(visits(shared), 1);
    assert_eq!(visits(a), 1);
    assert_eq!(visits(b), 1);
    assert_eq!(gc.last_metrics().objects_marked, 3);

    gc.run_collection();
    assert_eq!(visits(shared), 2);
    drop((h1, h2, h3));
}

#[test]
fn test_deep_chain_survives() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let head = new_node(&gc, classes.node, 0);
    let mut tail = head;
    for i in 1..10_000 {
        let next = new_node(&gc, classes.node, i);
        set_left(tail, Some(next));
        tail = next;
    }
    let handle = gc.new_root_handle(Some(head));

    gc.run_collection();
    assert_eq!(gc.last_metrics().objects_marked, 10_000);
    assert_eq!(finalized(), 0);
    assert_eq!(value(tail), 9_999);
    drop(handle);
}

#[test]
fn test_precise_slots_keep_targets_alive() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let slots = gc.gc_alloc(4 * size_of::<usize>(), GcKind::Precise);
    let target = new_node(&gc, classes.node, 7);
    common::fill_words(slots, &[0, target.as_ptr() as usize, 0, 0]);
    let handle = gc.new_root_handle(Some(slots));

    gc.run_collection();
    assert!(gc.is_valid_gc_object(target.as_ptr()));
    assert_eq!(finalized(), 0);
    drop(handle);
}

#[test]
fn test_conservative_interior_words_keep_targets_alive() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let words = gc.gc_alloc(2 * size_of::<usize>(), GcKind::Conservative);
    let target = new_node(&gc, classes.node, 7);
    common::fill_words(words, &[target.as_ptr() as usize + 5, 0xdead_beef]);
    let handle = gc.new_root_handle(Some(words));

    gc.run_collection();
    assert!(gc.is_valid_gc_object(target.as_ptr()));
    drop(handle);
}

#[test]
fn test_conservative_noise_does_not_retain_garbage() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let n = 512;
    let words = gc.gc_alloc(n * size_of::<usize>(), GcKind::Conservative);
    let garbage: Vec<_> = (0..16).map(|i| new_node(&gc, classes.node, i)).collect();

    // xorshift noise, with anything landing in an arena window zeroed.
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut noise = Vec::with_capacity(n);
    {
        let heap = gc.heap();
        for _ in 0..n {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            #[allow(clippy::cast_possible_truncation)]
            let word = state as usize;
            noise.push(if heap.in_arena_bounds(word) { 0 } else { word });
        }
    }
    common::fill_words(words, &noise);
    let handle = gc.new_root_handle(Some(words));

    gc.run_collection();
    assert!(gc.is_valid_gc_memory(words.as_ptr()));
    for node in garbage {
        assert!(!gc.is_valid_gc_memory(node.as_ptr()));
    }
    assert_eq!(finalized(), 16);
    drop(handle);
}

#[test]
fn test_conservative_allocation_promoted_to_object() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let node = new_node_of_kind(&gc, classes.node, 1, GcKind::Conservative);
    let child = new_node(&gc, classes.node, 2);
    set_left(node, Some(child));
    assert!(gc.is_valid_gc_object(node.as_ptr()));

    let handle = gc.new_root_handle(Some(node));
    gc.run_collection();
    assert!(gc.is_valid_gc_object(child.as_ptr()));

    drop(handle);
    gc.run_collection();
    assert_eq!(finalized(), 2);
}

#[test]
fn test_auxiliary_allocations_use_their_own_hook() {
    use arena_gc::AuxiliaryHeader;
    use std::ptr::NonNull;

    #[repr(C)]
    struct Table {
        header: AuxiliaryHeader,
        entry: *const u8,
    }

    fn visit_table(visitor: &mut arena_gc::GcVisitor<'_>, obj: NonNull<u8>) {
        let table = unsafe { obj.cast::<Table>().as_ref() };
        visitor.visit(table.entry);
    }

    let gc = mark_sweep();
    let entry = gc.gc_alloc(16, GcKind::Untracked);
    let table = gc.gc_alloc(size_of::<Table>(), GcKind::Auxiliary);
    unsafe {
        table.cast::<Table>().as_ptr().write(Table {
            header: AuxiliaryHeader {
                visit: Some(visit_table),
            },
            entry: entry.as_ptr(),
        });
    }
    let handle = gc.new_root_handle(Some(table));

    gc.run_collection();
    assert!(gc.is_valid_gc_memory(entry.as_ptr()));
    drop(handle);
}

#[test]
fn test_explicit_free_runs_finalizer() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let node = new_node(&gc, classes.node, 1);
    gc.gc_free(node);
    assert_eq!(finalized(), 1);
    assert!(!gc.is_valid_gc_memory(node.as_ptr()));
    gc.run_collection();
    assert_eq!(finalized(), 1);
}

#[test]
fn test_large_and_huge_objects_are_swept() {
    let gc = mark_sweep();
    let large = gc.gc_alloc(64 * 1024, GcKind::Precise);
    let huge = gc.gc_alloc(4 << 20, GcKind::Untracked);
    let kept = gc.gc_alloc(64 * 1024, GcKind::Untracked);
    let handle = gc.new_root_handle(Some(kept));

    gc.run_collection();
    assert!(!gc.is_valid_gc_memory(large.as_ptr()));
    assert!(!gc.is_valid_gc_memory(huge.as_ptr()));
    assert!(gc.is_valid_gc_memory(kept.as_ptr()));

    let stats = gc.dump_statistics();
    assert_eq!(stats.region("large").unwrap().live_objects, 1);
    assert_eq!(stats.region("huge").unwrap().live_objects, 0);
    drop(handle);
}

#[test]
fn test_reused_cell_is_cleared_for_precise_scan() {
    let gc = mark_sweep();
    let stale = gc.gc_alloc(24, GcKind::Untracked);
    unsafe { stale.as_ptr().write_bytes(0xab, 24) };
    gc.gc_free(stale);

    let slots = gc.gc_alloc(17, GcKind::Precise);
    assert_eq!(slots, stale);
    let words = unsafe { std::slice::from_raw_parts(slots.cast::<usize>().as_ptr(), 3) };
    assert_eq!(words, [0, 0, 0]);

    let handle = gc.new_root_handle(Some(slots));
    gc.run_collection();
    assert!(gc.is_valid_gc_memory(slots.as_ptr()));
    drop(handle);
}

#[test]
fn test_reused_cell_does_not_retain_previous_referents() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let target = new_node(&gc, classes.node, 4);
    let stale = gc.gc_alloc(24, GcKind::Untracked);
    common::fill_words(stale, &[0, 0, target.as_ptr() as usize]);
    gc.gc_free(stale);

    let words = gc.gc_alloc(17, GcKind::Conservative);
    assert_eq!(words, stale);
    let handle = gc.new_root_handle(Some(words));
    gc.run_collection();
    assert!(!gc.is_valid_gc_object(target.as_ptr()));
    assert_eq!(finalized(), 1);
    drop(handle);
}
