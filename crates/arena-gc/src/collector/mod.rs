//! Collector instances.
//!
//! A [`Collector`] owns one heap plus every registry the collector needs
//! (roots, live classes, weak references) and runs one [`CollectionStrategy`].
//! The facade talks to it through the object-safe [`GcBase`] trait so the
//! strategy is chosen once, at install time.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Instant;

use crate::config::{CollectorKind, GcConfig};
use crate::error::{GcError, OrFatal};
use crate::header::{scan_size_for, GcAllocation, GcKind, HEADER_SIZE};
use crate::heap::{Heap, HeapStatistics};
use crate::metrics::{record_metrics, GcMetrics};
use crate::object::{self, AuxiliaryHeader, TypeOps};
use crate::roots::{RootHandle, RootRegistry};
use crate::stack::{NativeStackWalker, StackWalker};
use crate::visitor::GcVisitor;
use crate::weak::{WeakCallback, WeakRef, WeakRegistry};

mod mark_sweep;
mod semispace;

pub use mark_sweep::MarkSweep;
pub use semispace::SemiSpace;

/// Where a collector is in its cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollectorPhase {
    /// Not collecting.
    #[default]
    Idle,
    /// Scanning roots and traversing the graph.
    Marking,
    /// Releasing unmarked allocations and clearing weak references.
    Sweeping,
    /// Running weak reference callbacks outside the non-reentrant section.
    WeakCallbackDelivery,
    /// Swapping semispace roles.
    Flipping,
}

/// The operations every collector offers the runtime.
///
/// Failures are never reported to the caller: a broken invariant stops the
/// process through [`fatal`](crate::fatal).
pub trait GcBase {
    /// The algorithm this collector runs.
    fn kind(&self) -> CollectorKind;

    /// The configuration it was built with.
    fn config(&self) -> &GcConfig;

    /// Allocate `bytes` bytes of payload tagged `kind`.
    ///
    /// Payloads of scanned kinds are zeroed. May run a collection first if
    /// the allocation crosses the byte threshold while enabled.
    fn gc_alloc(&self, bytes: usize, kind: GcKind) -> NonNull<u8>;

    /// Resize the payload at `ptr`, moving it if necessary.
    fn gc_realloc(&self, ptr: NonNull<u8>, bytes: usize) -> NonNull<u8>;

    /// Release the allocation at `ptr`, running its finalizer.
    fn gc_free(&self, ptr: NonNull<u8>);

    /// Collect now, whether or not collection is enabled.
    fn run_collection(&self);

    /// Whether the byte threshold may trigger collections.
    fn is_enabled(&self) -> bool;

    /// Allow threshold-triggered collections.
    fn enable(&self);

    /// Suppress threshold-triggered collections.
    fn disable(&self);

    /// Count `bytes` of memory managed outside `gc_alloc` toward the threshold.
    fn register_gc_managed_bytes(&self, bytes: usize);

    /// Root `ptr` until deregistered.
    fn register_permanent_root(&self, ptr: NonNull<u8>, allow_duplicates: bool);

    /// Drop a permanent root.
    fn deregister_permanent_root(&self, ptr: NonNull<u8>);

    /// Whether `ptr` is a permanent root.
    fn is_permanent_root(&self, ptr: NonNull<u8>) -> bool;

    /// Record an object that lives outside the heap; its `size` bytes are
    /// scanned conservatively on every collection.
    fn register_nonheap_root(&self, ptr: NonNull<u8>, size: usize);

    /// Whether `ptr` is exactly a registered non-heap root.
    fn is_nonheap_root(&self, ptr: *const u8) -> bool;

    /// Scan `[start, end)` conservatively on every collection.
    fn register_potential_root_range(&self, start: *const u8, end: *const u8);

    /// A root handle holding `ptr`.
    fn new_root_handle(&self, ptr: Option<NonNull<u8>>) -> RootHandle;

    /// Enter an allocation into the object model.
    fn register_typed_object(&self, ptr: NonNull<u8>);

    /// Whether `ptr` is a non-heap root or the start of a live allocation.
    fn is_valid_gc_memory(&self, ptr: *const u8) -> bool;

    /// Whether `ptr` is a non-heap root or the start of a live runtime object.
    fn is_valid_gc_object(&self, ptr: *const u8) -> bool;

    /// Create a weak reference to the object at `target`.
    fn make_weak_ref(&self, target: NonNull<u8>, callback: Option<WeakCallback>) -> WeakRef;

    /// Enter the non-reentrant section explicitly.
    fn start_unexpected_region(&self);

    /// Leave a section entered with `start_unexpected_region`.
    fn end_unexpected_region(&self);

    /// Replace (or remove) the stack walker used during root marking.
    fn set_stack_walker(&self, walker: Option<Box<dyn StackWalker>>);

    /// Current phase.
    fn phase(&self) -> CollectorPhase;

    /// Collections started so far.
    fn collections(&self) -> usize;

    /// Metrics of this collector's last completed collection.
    fn last_metrics(&self) -> GcMetrics;

    /// Heap occupancy snapshot.
    fn dump_statistics(&self) -> HeapStatistics;

    /// Forget every root, class and weak reference.
    fn clear(&self);
}

mod sealed {
    pub trait Sealed {}
}

/// A collection algorithm over a particular heap layout.
pub trait CollectionStrategy: sealed::Sealed + 'static {
    /// Heap the strategy collects.
    type Heap: Heap;

    /// Algorithm tag.
    const KIND: CollectorKind;

    /// Name used in logs.
    const NAME: &'static str;

    /// Build an empty heap.
    ///
    /// # Errors
    ///
    /// Arena reservation failures.
    fn new_heap(config: &GcConfig) -> Result<Self::Heap, GcError>;

    /// Run one collection cycle.
    ///
    /// # Errors
    ///
    /// Any broken invariant met during the cycle.
    fn collect(core: &GcCore<Self::Heap>) -> Result<GcMetrics, GcError>;
}

/// State shared by every strategy.
pub struct GcCore<H> {
    heap: RefCell<H>,
    roots: RootRegistry,
    classes: RefCell<HashSet<usize>>,
    weak: WeakRegistry,
    config: GcConfig,
    stack_walker: RefCell<Option<Box<dyn StackWalker>>>,
    enabled: Cell<bool>,
    non_reentrant: Cell<bool>,
    phase: Cell<CollectorPhase>,
    bytes_since_collection: Cell<usize>,
    collections: Cell<usize>,
    last_metrics: Cell<GcMetrics>,
}

impl<H: Heap> GcCore<H> {
    fn new(heap: H, config: GcConfig) -> Self {
        let stack_walker: Option<Box<dyn StackWalker>> = if config.scan_native_stack {
            Some(Box::new(NativeStackWalker))
        } else {
            None
        };
        Self {
            heap: RefCell::new(heap),
            roots: RootRegistry::new(),
            classes: RefCell::new(HashSet::new()),
            weak: WeakRegistry::new(),
            config,
            stack_walker: RefCell::new(stack_walker),
            enabled: Cell::new(true),
            non_reentrant: Cell::new(false),
            phase: Cell::new(CollectorPhase::Idle),
            bytes_since_collection: Cell::new(0),
            collections: Cell::new(0),
            last_metrics: Cell::new(GcMetrics::new()),
        }
    }

    pub(crate) fn heap(&self) -> Result<Ref<'_, H>, GcError> {
        self.heap.try_borrow().map_err(|_| GcError::Reentrancy)
    }

    pub(crate) fn heap_mut(&self) -> Result<RefMut<'_, H>, GcError> {
        self.heap.try_borrow_mut().map_err(|_| GcError::Reentrancy)
    }

    pub(crate) const fn roots(&self) -> &RootRegistry {
        &self.roots
    }

    pub(crate) const fn weak(&self) -> &WeakRegistry {
        &self.weak
    }

    pub(crate) const fn config(&self) -> &GcConfig {
        &self.config
    }

    pub(crate) fn set_phase(&self, phase: CollectorPhase) {
        self.phase.set(phase);
    }

    /// Enter the non-reentrant section and count a new collection.
    pub(crate) fn begin_collection(&self) -> Result<usize, GcError> {
        self.enter_non_reentrant()?;
        let n = self.collections.get() + 1;
        self.collections.set(n);
        Ok(n)
    }

    pub(crate) fn enter_non_reentrant(&self) -> Result<(), GcError> {
        if self.non_reentrant.replace(true) {
            return Err(GcError::Reentrancy);
        }
        Ok(())
    }

    pub(crate) fn leave_non_reentrant(&self) -> Result<(), GcError> {
        if !self.non_reentrant.replace(false) {
            return Err(GcError::UnbalancedRegion);
        }
        Ok(())
    }

    fn check_not_collecting(&self) -> Result<(), GcError> {
        if self.non_reentrant.get() {
            return Err(GcError::Reentrancy);
        }
        Ok(())
    }

    /// Feed every stack and registered root to `visitor`.
    pub(crate) fn mark_roots(&self, visitor: &mut GcVisitor<'_>) -> Result<(), GcError> {
        if let Some(walker) = self
            .stack_walker
            .try_borrow_mut()
            .map_err(|_| GcError::Reentrancy)?
            .as_mut()
        {
            walker.visit_all_stacks(visitor);
        }
        self.roots.visit_roots(visitor);
        Ok(())
    }

    /// Keep unreachable classes alive for one more cycle so instances swept
    /// in this one can still read them, then drop them from the registry.
    ///
    /// A dying class's metaclass stays registered if it is dying too.
    pub(crate) fn retain_dead_classes(&self, visitor: &mut GcVisitor<'_>) -> Result<usize, GcError> {
        let registered: Vec<usize> = self.classes.borrow().iter().copied().collect();
        let mut dead = Vec::new();
        for addr in registered {
            let Some(class) = NonNull::new(addr as *mut u8) else {
                continue;
            };
            // SAFETY: registered classes are live allocations.
            let header = unsafe { GcAllocation::from_user_data(class).as_ref() };
            if !header.is_marked() {
                visitor.try_visit(addr)?;
                dead.push(addr);
            }
        }

        let marked = traverse(visitor)?;

        let mut classes = self.classes.borrow_mut();
        for addr in &dead {
            classes.remove(addr);
        }
        for &addr in &dead {
            let Some(class) = NonNull::new(addr as *mut u8) else {
                continue;
            };
            // SAFETY: still alive; it was marked above.
            if let Some(meta) = unsafe { object::class_of(class) } {
                let meta = meta.as_ptr() as usize;
                if dead.contains(&meta) {
                    classes.insert(meta);
                }
            }
        }
        Ok(marked)
    }

    /// Finalize an allocation that is about to be released.
    ///
    /// Returns `Ok(false)` when the object is weakly referenced and `defer`
    /// is set; nothing is finalized in that case.
    pub(crate) fn finalize(&self, alloc: NonNull<GcAllocation>, defer: bool) -> Result<bool, GcError> {
        let user = GcAllocation::user_data(alloc);
        let addr = user.as_ptr() as usize;
        // SAFETY: the heap only hands live headers to its reclaim hook.
        let header = unsafe { alloc.as_ref() };
        let kind = header
            .kind()
            .ok_or(GcError::UnknownKind(header.kind_raw(), addr))?;
        if !kind.is_object() {
            return Ok(true);
        }

        self.classes.borrow_mut().remove(&addr);
        // SAFETY: object payloads start with a header; a set class outlives
        // its instances by at least one cycle.
        let Some(ops) = (unsafe { object::ops_of(user) }) else {
            return Ok(true);
        };
        if ops.supports_weakrefs {
            if self.weak.has_live_refs(addr) {
                if defer {
                    return Ok(false);
                }
                return Err(GcError::FreeWhileWeaklyReferenced(addr));
            }
            self.weak.take(addr);
        }
        if let Some(finalizer) = ops.finalizer {
            finalizer(user);
        }
        Ok(true)
    }

    /// Finalize and release the allocation whose payload starts at `user`.
    pub(crate) fn release(&self, heap: &mut H, user: NonNull<u8>) -> Result<(), GcError> {
        let alloc = GcAllocation::from_user_data(user);
        self.finalize(alloc, false)?;
        heap.free(alloc)
    }

    /// The header of the allocation whose payload starts exactly at `addr`.
    fn allocation_at(&self, addr: usize) -> Result<NonNull<GcAllocation>, GcError> {
        let heap = self.heap()?;
        match heap.get_allocation_from_interior_pointer(addr) {
            Some(alloc) if GcAllocation::user_data(alloc).as_ptr() as usize == addr => Ok(alloc),
            _ => Err(GcError::NotAllocated(addr)),
        }
    }

    fn ops_for_weak_target(&self, target: NonNull<u8>) -> Result<&'static TypeOps, GcError> {
        let addr = target.as_ptr() as usize;
        if !self.roots.is_nonheap_root(addr) {
            let alloc = self
                .allocation_at(addr)
                .map_err(|_| GcError::WeakRefsUnsupported(addr))?;
            // SAFETY: live allocation.
            let kind = unsafe { alloc.as_ref() }.kind();
            if !kind.is_some_and(GcKind::is_object) {
                return Err(GcError::WeakRefsUnsupported(addr));
            }
        }
        // SAFETY: an object or a registered static object.
        match unsafe { object::ops_of(target) } {
            Some(ops) if ops.supports_weakrefs => Ok(ops),
            _ => Err(GcError::WeakRefsUnsupported(addr)),
        }
    }
}

impl<H> fmt::Debug for GcCore<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcCore")
            .field("phase", &self.phase.get())
            .field("enabled", &self.enabled.get())
            .field("non_reentrant", &self.non_reentrant.get())
            .field("collections", &self.collections.get())
            .field("bytes_since_collection", &self.bytes_since_collection.get())
            .finish_non_exhaustive()
    }
}

/// Zero bytes `from..to` of an allocation, counted from its header.
///
/// # Safety
///
/// `alloc` must be live and span at least `to` bytes.
unsafe fn zero_allocation_bytes(alloc: NonNull<GcAllocation>, from: usize, to: usize) {
    if from < to {
        unsafe { std::ptr::write_bytes(alloc.cast::<u8>().as_ptr().add(from), 0, to - from) };
    }
}

/// Pop and scan until the gray set is empty. Returns how many allocations
/// were scanned.
pub(crate) fn traverse(visitor: &mut GcVisitor<'_>) -> Result<usize, GcError> {
    let mut scanned = 0;
    while let Some(user) = visitor.pop() {
        visit_by_kind(visitor, user)?;
        scanned += 1;
    }
    Ok(scanned)
}

/// Scan one marked allocation's children according to its kind.
pub(crate) fn visit_by_kind(visitor: &mut GcVisitor<'_>, user: NonNull<u8>) -> Result<(), GcError> {
    // SAFETY: only live allocations are ever pushed.
    let header = unsafe { GcAllocation::from_user_data(user).as_ref() };
    let kind = header
        .kind()
        .ok_or(GcError::UnknownKind(header.kind_raw(), user.as_ptr() as usize))?;

    let start = user.as_ptr().cast::<usize>().cast_const();
    let words = header.scan_size() / size_of::<usize>();
    match kind {
        GcKind::Untracked => {}
        GcKind::Conservative | GcKind::ConservativeTyped => {
            // SAFETY: scan_size never exceeds the payload.
            unsafe { visitor.visit_potential_range(start, start.add(words)) };
        }
        GcKind::Precise => {
            // SAFETY: as above.
            unsafe { visitor.try_visit_range(start, start.add(words))? };
        }
        GcKind::Typed => {
            // SAFETY: typed payloads start with an object header.
            if let Some(ops) = unsafe { object::ops_of(user) } {
                (ops.visit_children)(visitor, user);
            }
        }
        GcKind::Auxiliary => {
            // SAFETY: auxiliary payloads start with their own header.
            let aux = unsafe { user.cast::<AuxiliaryHeader>().as_ref() };
            if let Some(visit) = aux.visit {
                visit(visitor, user);
            }
        }
    }
    Ok(())
}

/// One collector instance running strategy `S`.
pub struct Collector<S: CollectionStrategy> {
    core: GcCore<S::Heap>,
    _strategy: PhantomData<S>,
}

/// Non-moving mark-sweep collector.
pub type MarkSweepCollector = Collector<MarkSweep>;

/// Semispace collector whose cycle is a flip.
pub type SemiSpaceCollector = Collector<SemiSpace>;

impl<S: CollectionStrategy> Collector<S> {
    /// Build a collector with fresh arenas.
    ///
    /// # Errors
    ///
    /// An invalid configuration, a configuration naming another strategy, or
    /// an arena reservation failure.
    pub fn new(config: GcConfig) -> Result<Self, GcError> {
        config.validate()?;
        if config.strategy != S::KIND {
            return Err(GcError::InvalidConfig(
                "configured strategy does not match the collector type",
            ));
        }
        let heap = S::new_heap(&config)?;
        Ok(Self {
            core: GcCore::new(heap, config),
            _strategy: PhantomData,
        })
    }

    fn try_collect(&self) -> Result<(), GcError> {
        #[cfg(feature = "tracing")]
        let _span = crate::tracing::internal::trace_gc_collection(
            S::NAME,
            crate::tracing::internal::next_gc_id(),
        );

        let outer = self.core.phase.get();
        let start = Instant::now();
        let mut metrics = S::collect(&self.core)?;
        self.core.phase.set(outer);

        metrics.duration = start.elapsed();
        metrics.total_collections = self.core.collections.get();
        self.core.last_metrics.set(metrics);
        record_metrics(&metrics);
        Ok(())
    }

    /// Count `bytes` toward the threshold; collect if it trips while enabled.
    fn note_bytes(&self, bytes: usize) -> Result<(), GcError> {
        let total = self.core.bytes_since_collection.get().saturating_add(bytes);
        if total < self.core.config.alloc_bytes_per_collection {
            self.core.bytes_since_collection.set(total);
            return Ok(());
        }
        self.core.bytes_since_collection.set(0);
        if self.core.enabled.get() {
            self.try_collect()?;
        }
        Ok(())
    }

    fn try_alloc(&self, bytes: usize, kind: GcKind) -> Result<NonNull<u8>, GcError> {
        self.core.check_not_collecting()?;
        let total = bytes
            .checked_add(HEADER_SIZE)
            .ok_or(GcError::AllocationTooLarge(bytes))?;
        let scan_size = if kind.uses_scan_size() {
            scan_size_for(bytes)?
        } else {
            0
        };
        self.note_bytes(total)?;

        let (alloc, capacity) = {
            let mut heap = self.core.heap_mut()?;
            let alloc = heap.alloc(total)?;
            (alloc, heap.capacity_of(alloc).unwrap_or(total))
        };
        // SAFETY: fresh allocation of at least `total` bytes.
        unsafe { GcAllocation::init(alloc, kind, scan_size) };
        if kind != GcKind::Untracked {
            // Cells are reused without clearing; nothing past the header may
            // hold an earlier occupant's words.
            let end = capacity.max(HEADER_SIZE + scan_size as usize);
            // SAFETY: the cell spans `capacity` bytes, and any rounding of the
            // scan size stays within the cell's alignment padding.
            unsafe { zero_allocation_bytes(alloc, HEADER_SIZE, end) };
        }
        Ok(GcAllocation::user_data(alloc))
    }

    fn try_realloc(&self, ptr: NonNull<u8>, bytes: usize) -> Result<NonNull<u8>, GcError> {
        self.core.check_not_collecting()?;
        let old = self.core.allocation_at(ptr.as_ptr() as usize)?;
        let total = bytes
            .checked_add(HEADER_SIZE)
            .ok_or(GcError::AllocationTooLarge(bytes))?;
        // SAFETY: `old` is live.
        let kind = unsafe { old.as_ref() }.kind();
        let scan_size = match kind {
            Some(kind) if kind.uses_scan_size() => Some(scan_size_for(bytes)?),
            _ => None,
        };
        // Counted now; a collection it trips waits for the next allocation.
        let counted = self.core.bytes_since_collection.get().saturating_add(total);
        self.core.bytes_since_collection.set(counted);

        self.core.enter_non_reentrant()?;
        let (moved, old_capacity, capacity) = {
            let mut heap = self.core.heap_mut()?;
            let old_capacity = heap.capacity_of(old).unwrap_or(total);
            let moved = heap.realloc(old, total, &mut |released| {
                self.core.finalize(released, false).map(|_| ())
            })?;
            (moved, old_capacity, heap.capacity_of(moved).unwrap_or(total))
        };
        self.core.leave_non_reentrant()?;

        // SAFETY: `moved` is live and carries the old header.
        let header = unsafe { moved.as_ref() };
        if let Some(scan_size) = scan_size {
            header.set_scan_size(scan_size);
        }
        if kind != Some(GcKind::Untracked) {
            // Everything past the kept prefix is either truncated payload or
            // a reused cell's leftovers.
            let kept = old_capacity.min(total);
            let end = capacity.max(HEADER_SIZE + scan_size.unwrap_or(0) as usize);
            // SAFETY: as in `try_alloc`.
            unsafe { zero_allocation_bytes(moved, kept, end) };
        }
        Ok(GcAllocation::user_data(moved))
    }

    fn try_free(&self, ptr: NonNull<u8>) -> Result<(), GcError> {
        self.core.check_not_collecting()?;
        self.core.allocation_at(ptr.as_ptr() as usize)?;
        self.core.enter_non_reentrant()?;
        {
            let mut heap = self.core.heap_mut()?;
            self.core.release(&mut heap, ptr)?;
        }
        self.core.leave_non_reentrant()
    }

    fn try_register_typed_object(&self, ptr: NonNull<u8>) -> Result<(), GcError> {
        let addr = ptr.as_ptr() as usize;
        // Static objects carry no allocation header and are never swept.
        if self.core.roots.is_nonheap_root(addr) {
            return Ok(());
        }

        let alloc = self.core.allocation_at(addr)?;
        // SAFETY: live allocation.
        let header = unsafe { alloc.as_ref() };
        match header.kind() {
            Some(GcKind::Conservative) => {
                header.promote_to_conservative_typed();
            }
            Some(GcKind::Typed | GcKind::ConservativeTyped) => {}
            Some(kind) => return Err(GcError::NotAnObject { addr, kind }),
            None => return Err(GcError::UnknownKind(header.kind_raw(), addr)),
        }

        // SAFETY: objects begin with a header.
        let ops = unsafe { object::ops_of(ptr) }.ok_or(GcError::UnclassedObject(addr))?;
        if ops.instances_are_classes {
            self.core.classes.borrow_mut().insert(addr);
        }
        Ok(())
    }

    fn try_make_weak_ref(
        &self,
        target: NonNull<u8>,
        callback: Option<WeakCallback>,
    ) -> Result<WeakRef, GcError> {
        self.core.check_not_collecting()?;
        self.core.ops_for_weak_target(target)?;
        Ok(self.core.weak.add(target, callback))
    }

    fn lookup(&self, ptr: *const u8) -> Option<NonNull<GcAllocation>> {
        let addr = ptr as usize;
        let alloc = self
            .core
            .heap()
            .ok()?
            .get_allocation_from_interior_pointer(addr)?;
        (GcAllocation::user_data(alloc).as_ptr() as usize == addr).then_some(alloc)
    }

    /// Live class registrations.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.core.classes.borrow().len()
    }

    /// Weak reference records currently listed for `target`.
    #[must_use]
    pub fn weak_ref_count(&self, target: NonNull<u8>) -> usize {
        self.core.weak.count(target.as_ptr() as usize)
    }

    /// Borrow the heap, e.g. for strategy-specific inspection.
    ///
    /// # Panics
    ///
    /// Panics if called while a collection holds the heap.
    #[must_use]
    pub fn heap(&self) -> Ref<'_, S::Heap> {
        self.core.heap().or_fatal()
    }
}

impl<S: CollectionStrategy> GcBase for Collector<S> {
    fn kind(&self) -> CollectorKind {
        S::KIND
    }

    fn config(&self) -> &GcConfig {
        &self.core.config
    }

    fn gc_alloc(&self, bytes: usize, kind: GcKind) -> NonNull<u8> {
        self.try_alloc(bytes, kind).or_fatal()
    }

    fn gc_realloc(&self, ptr: NonNull<u8>, bytes: usize) -> NonNull<u8> {
        self.try_realloc(ptr, bytes).or_fatal()
    }

    fn gc_free(&self, ptr: NonNull<u8>) {
        self.try_free(ptr).or_fatal();
    }

    fn run_collection(&self) {
        self.try_collect().or_fatal();
    }

    fn is_enabled(&self) -> bool {
        self.core.enabled.get()
    }

    fn enable(&self) {
        self.core.enabled.set(true);
    }

    fn disable(&self) {
        self.core.enabled.set(false);
    }

    fn register_gc_managed_bytes(&self, bytes: usize) {
        self.note_bytes(bytes).or_fatal();
    }

    fn register_permanent_root(&self, ptr: NonNull<u8>, allow_duplicates: bool) {
        self.core
            .roots
            .register_permanent_root(ptr, allow_duplicates)
            .or_fatal();
    }

    fn deregister_permanent_root(&self, ptr: NonNull<u8>) {
        self.core.roots.deregister_permanent_root(ptr).or_fatal();
    }

    fn is_permanent_root(&self, ptr: NonNull<u8>) -> bool {
        self.core.roots.is_permanent_root(ptr)
    }

    fn register_nonheap_root(&self, ptr: NonNull<u8>, size: usize) {
        let addr = ptr.as_ptr() as usize;
        if self.core.heap().or_fatal().in_arena_bounds(addr) {
            crate::fatal(GcError::InvalidRootRegistration {
                addr,
                reason: "non-heap root lies inside the heap",
            });
        }
        self.core.roots.register_nonheap_root(ptr, size).or_fatal();
    }

    fn is_nonheap_root(&self, ptr: *const u8) -> bool {
        self.core.roots.is_nonheap_root(ptr as usize)
    }

    fn register_potential_root_range(&self, start: *const u8, end: *const u8) {
        self.core
            .roots
            .register_potential_range(start as usize, end as usize);
    }

    fn new_root_handle(&self, ptr: Option<NonNull<u8>>) -> RootHandle {
        self.core.roots.new_handle(ptr)
    }

    fn register_typed_object(&self, ptr: NonNull<u8>) {
        self.try_register_typed_object(ptr).or_fatal();
    }

    fn is_valid_gc_memory(&self, ptr: *const u8) -> bool {
        self.is_nonheap_root(ptr) || self.lookup(ptr).is_some()
    }

    fn is_valid_gc_object(&self, ptr: *const u8) -> bool {
        if self.is_nonheap_root(ptr) {
            return true;
        }
        self.lookup(ptr)
            // SAFETY: live allocation.
            .and_then(|alloc| unsafe { alloc.as_ref() }.kind())
            .is_some_and(GcKind::is_object)
    }

    fn make_weak_ref(&self, target: NonNull<u8>, callback: Option<WeakCallback>) -> WeakRef {
        self.try_make_weak_ref(target, callback).or_fatal()
    }

    fn start_unexpected_region(&self) {
        self.core.enter_non_reentrant().or_fatal();
    }

    fn end_unexpected_region(&self) {
        self.core.leave_non_reentrant().or_fatal();
    }

    fn set_stack_walker(&self, walker: Option<Box<dyn StackWalker>>) {
        match self.core.stack_walker.try_borrow_mut() {
            Ok(mut slot) => *slot = walker,
            Err(_) => crate::fatal(GcError::Reentrancy),
        }
    }

    fn phase(&self) -> CollectorPhase {
        self.core.phase.get()
    }

    fn collections(&self) -> usize {
        self.core.collections.get()
    }

    fn last_metrics(&self) -> GcMetrics {
        self.core.last_metrics.get()
    }

    fn dump_statistics(&self) -> HeapStatistics {
        self.core.heap().or_fatal().dump_statistics()
    }

    fn clear(&self) {
        self.core.roots.clear();
        self.core.weak.clear();
        self.core.classes.borrow_mut().clear();
    }
}

impl<S: CollectionStrategy> fmt::Debug for Collector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("strategy", &S::NAME)
            .field("core", &self.core)
            .finish()
    }
}

/// Build the collector `config.strategy` names.
///
/// # Errors
///
/// See [`Collector::new`].
pub fn new_collector(config: GcConfig) -> Result<Rc<dyn GcBase>, GcError> {
    Ok(match config.strategy {
        CollectorKind::MarkSweep => Rc::new(MarkSweepCollector::new(config)?),
        CollectorKind::SemiSpace => Rc::new(SemiSpaceCollector::new(config)?),
    })
}
