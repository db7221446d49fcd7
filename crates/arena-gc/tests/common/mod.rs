//! A tiny object model shared by the integration tests.
//!
//! `Node` is a typed object with two reference fields and a counter payload.
//! Its class is either a leaked static `ClassObject` registered as a non-heap
//! root, or a class allocated on the managed heap.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::mem::size_of;
use std::ptr::{self, NonNull};

use arena_gc::object::{visit_class, METACLASS_OPS};
use arena_gc::{
    ClassObject, CollectorKind, GcBase, GcConfig, GcKind, GcVisitor, MarkSweepCollector,
    ObjectHeader, SemiSpaceCollector, TypeOps,
};

pub fn config() -> GcConfig {
    GcConfig::new()
        .with_arena_size(64 << 20)
        .with_commit_increment(1 << 20)
        .with_scan_native_stack(false)
}

pub fn mark_sweep() -> MarkSweepCollector {
    MarkSweepCollector::new(config()).unwrap()
}

pub fn semispace() -> SemiSpaceCollector {
    SemiSpaceCollector::new(config().with_strategy(CollectorKind::SemiSpace)).unwrap()
}

#[repr(C)]
pub struct Node {
    pub header: ObjectHeader,
    pub left: *const u8,
    pub right: *const u8,
    pub value: usize,
}

thread_local! {
    static FINALIZED: Cell<usize> = const { Cell::new(0) };
    static VISITS: RefCell<HashMap<usize, usize>> = RefCell::new(HashMap::new());
}

fn visit_node(visitor: &mut GcVisitor<'_>, obj: NonNull<u8>) {
    visit_class(visitor, obj);
    VISITS.with(|v| *v.borrow_mut().entry(obj.as_ptr() as usize).or_default() += 1);
    let node = unsafe { obj.cast::<Node>().as_ref() };
    visitor.visit(node.left);
    visitor.visit(node.right);
}

fn finalize_node(_obj: NonNull<u8>) {
    FINALIZED.with(|f| f.set(f.get() + 1));
}

pub static NODE_OPS: TypeOps = TypeOps {
    name: "node",
    visit_children: visit_node,
    finalizer: Some(finalize_node),
    supports_weakrefs: true,
    instances_are_classes: false,
};

/// Finalizers run on this thread so far.
pub fn finalized() -> usize {
    FINALIZED.with(Cell::get)
}

/// How many times `obj` has had its children visited on this thread.
pub fn visits(obj: NonNull<u8>) -> usize {
    VISITS.with(|v| v.borrow().get(&(obj.as_ptr() as usize)).copied().unwrap_or(0))
}

pub fn reset_counters() {
    FINALIZED.with(|f| f.set(0));
    VISITS.with(|v| v.borrow_mut().clear());
}

/// Static classes living outside the heap.
#[derive(Clone, Copy)]
pub struct Classes {
    pub meta: NonNull<ClassObject>,
    pub node: NonNull<ClassObject>,
}

/// Leak a self-describing metaclass and a node class, and register both as
/// non-heap roots of `gc`.
pub fn static_classes(gc: &dyn GcBase) -> Classes {
    let meta = Box::into_raw(Box::new(ClassObject {
        header: ObjectHeader { class: ptr::null() },
        ops: &METACLASS_OPS,
    }));
    unsafe { (*meta).header.class = meta };
    let node = Box::into_raw(Box::new(ClassObject {
        header: ObjectHeader { class: meta },
        ops: &NODE_OPS,
    }));

    let meta = NonNull::new(meta).unwrap();
    let node = NonNull::new(node).unwrap();
    gc.register_nonheap_root(meta.cast(), size_of::<ClassObject>());
    gc.register_nonheap_root(node.cast(), size_of::<ClassObject>());
    Classes { meta, node }
}

/// Allocate a class on the managed heap and register it.
pub fn heap_class(
    gc: &dyn GcBase,
    metaclass: NonNull<ClassObject>,
    ops: &'static TypeOps,
) -> NonNull<u8> {
    let p = gc.gc_alloc(size_of::<ClassObject>(), GcKind::Typed);
    unsafe {
        p.cast::<ClassObject>().as_ptr().write(ClassObject {
            header: ObjectHeader {
                class: metaclass.as_ptr(),
            },
            ops,
        });
    }
    gc.register_typed_object(p);
    p
}

/// Allocate and register a node of class `class`.
pub fn new_node(gc: &dyn GcBase, class: NonNull<ClassObject>, value: usize) -> NonNull<u8> {
    new_node_of_kind(gc, class, value, GcKind::Typed)
}

pub fn new_node_of_kind(
    gc: &dyn GcBase,
    class: NonNull<ClassObject>,
    value: usize,
    kind: GcKind,
) -> NonNull<u8> {
    let p = gc.gc_alloc(size_of::<Node>(), kind);
    unsafe {
        p.cast::<Node>().as_ptr().write(Node {
            header: ObjectHeader {
                class: class.as_ptr(),
            },
            left: ptr::null(),
            right: ptr::null(),
            value,
        });
    }
    gc.register_typed_object(p);
    p
}

pub fn set_left(node: NonNull<u8>, to: Option<NonNull<u8>>) {
    unsafe { (*node.cast::<Node>().as_ptr()).left = to.map_or(ptr::null(), |p| p.as_ptr()) };
}

pub fn set_right(node: NonNull<u8>, to: Option<NonNull<u8>>) {
    unsafe { (*node.cast::<Node>().as_ptr()).right = to.map_or(ptr::null(), |p| p.as_ptr()) };
}

pub fn value(node: NonNull<u8>) -> usize {
    unsafe { node.cast::<Node>().as_ref() }.value
}

/// Write `words` into a pointer-sized slot array payload.
pub fn fill_words(payload: NonNull<u8>, words: &[usize]) {
    let slots = payload.cast::<usize>().as_ptr();
    for (i, &w) in words.iter().enumerate() {
        unsafe { slots.add(i).write(w) };
    }
}
