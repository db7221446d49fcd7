//! Heap-allocated classes outlive their last instances by one cycle.

mod common;

use arena_gc::object::METACLASS_OPS;
use arena_gc::GcBase;
use common::{finalized, heap_class, mark_sweep, new_node, reset_counters, static_classes, NODE_OPS};

#[test]
fn test_dead_class_survives_one_cycle() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let class = heap_class(&gc, classes.meta, &NODE_OPS);
    assert_eq!(gc.class_count(), 1);
    let _instances: Vec<_> = (0..4)
        .map(|i| new_node(&gc, class.cast(), i))
        .collect();

    // Instances die now and their finalizers still read the class.
    gc.run_collection();
    assert_eq!(finalized(), 4);
    assert!(gc.is_valid_gc_object(class.as_ptr()));
    assert_eq!(gc.class_count(), 0);

    gc.run_collection();
    assert!(!gc.is_valid_gc_memory(class.as_ptr()));
}

#[test]
fn test_reachable_class_stays_registered() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let class = heap_class(&gc, classes.meta, &NODE_OPS);
    let node = new_node(&gc, class.cast(), 1);
    let handle = gc.new_root_handle(Some(node));

    gc.run_collection();
    gc.run_collection();
    assert_eq!(gc.class_count(), 1);
    assert!(gc.is_valid_gc_object(class.as_ptr()));

    drop(handle);
    gc.run_collection();
    assert_eq!(finalized(), 1);
    assert_eq!(gc.class_count(), 0);
    gc.run_collection();
    assert!(!gc.is_valid_gc_memory(class.as_ptr()));
}

#[test]
fn test_dying_metaclass_is_kept_for_its_dying_class() {
    reset_counters();
    let gc = mark_sweep();
    let classes = static_classes(&gc);

    let metaclass = heap_class(&gc, classes.meta, &METACLASS_OPS);
    let class = heap_class(&gc, metaclass.cast(), &NODE_OPS);
    assert_eq!(gc.class_count(), 2);

    // Both die: the class is dropped from the registry, its metaclass is
    // re-registered so it lasts as long as the class.
    gc.run_collection();
    assert!(gc.is_valid_gc_object(metaclass.as_ptr()));
    assert!(gc.is_valid_gc_object(class.as_ptr()));
    assert_eq!(gc.class_count(), 1);

    gc.run_collection();
    assert!(gc.is_valid_gc_object(metaclass.as_ptr()));
    assert!(!gc.is_valid_gc_memory(class.as_ptr()));
    assert_eq!(gc.class_count(), 0);

    gc.run_collection();
    assert!(!gc.is_valid_gc_memory(metaclass.as_ptr()));
}
