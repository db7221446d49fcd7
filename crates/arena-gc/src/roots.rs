//! Root registry: locations that are live regardless of the object graph.
//!
//! Four sources feed root marking:
//!
//! - permanent roots, registered one pointer at a time;
//! - non-heap roots, objects that live outside every arena (static runtime
//!   singletons). Each is known by exact address and its bytes are also
//!   registered as a potential range;
//! - potential ranges, scanned conservatively;
//! - root handles, RAII slots holding one managed pointer each.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::ptr::NonNull;
use std::rc::Rc;

use crate::error::GcError;
use crate::visitor::GcVisitor;

#[derive(Debug, Default)]
struct HandleTable {
    next_id: u64,
    slots: BTreeMap<u64, Rc<Cell<usize>>>,
}

/// Process-lifetime root sets owned by one collector.
#[derive(Debug)]
pub struct RootRegistry {
    permanent: RefCell<HashSet<usize>>,
    nonheap: RefCell<HashSet<usize>>,
    min_nonheap: Cell<usize>,
    max_nonheap: Cell<usize>,
    potential_ranges: RefCell<Vec<(usize, usize)>>,
    handles: Rc<RefCell<HandleTable>>,
}

impl Default for RootRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RootRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            permanent: RefCell::new(HashSet::new()),
            nonheap: RefCell::new(HashSet::new()),
            min_nonheap: Cell::new(usize::MAX),
            max_nonheap: Cell::new(0),
            potential_ranges: RefCell::new(Vec::new()),
            handles: Rc::new(RefCell::new(HandleTable::default())),
        }
    }

    /// Add a permanent root.
    ///
    /// # Errors
    ///
    /// Registering the same pointer twice without `allow_duplicates`.
    pub fn register_permanent_root(
        &self,
        ptr: NonNull<u8>,
        allow_duplicates: bool,
    ) -> Result<(), GcError> {
        let addr = ptr.as_ptr() as usize;
        let inserted = self.permanent.borrow_mut().insert(addr);
        if !inserted && !allow_duplicates {
            return Err(GcError::InvalidRootRegistration {
                addr,
                reason: "permanent root registered twice",
            });
        }
        Ok(())
    }

    /// Remove a permanent root.
    ///
    /// # Errors
    ///
    /// The pointer was never registered.
    pub fn deregister_permanent_root(&self, ptr: NonNull<u8>) -> Result<(), GcError> {
        let addr = ptr.as_ptr() as usize;
        if self.permanent.borrow_mut().remove(&addr) {
            Ok(())
        } else {
            Err(GcError::InvalidRootRegistration {
                addr,
                reason: "permanent root was not registered",
            })
        }
    }

    /// Whether `ptr` is a permanent root.
    #[must_use]
    pub fn is_permanent_root(&self, ptr: NonNull<u8>) -> bool {
        self.permanent.borrow().contains(&(ptr.as_ptr() as usize))
    }

    /// Record an object that lives outside the heap and scan its `size` bytes
    /// conservatively.
    ///
    /// # Errors
    ///
    /// The object was already registered.
    pub fn register_nonheap_root(&self, ptr: NonNull<u8>, size: usize) -> Result<(), GcError> {
        let addr = ptr.as_ptr() as usize;
        if !self.nonheap.borrow_mut().insert(addr) {
            return Err(GcError::InvalidRootRegistration {
                addr,
                reason: "non-heap root registered twice",
            });
        }
        self.register_potential_range(addr, addr + size);
        self.min_nonheap.set(self.min_nonheap.get().min(addr));
        self.max_nonheap.set(self.max_nonheap.get().max(addr));
        Ok(())
    }

    /// Whether `addr` is exactly a registered non-heap root.
    #[inline]
    #[must_use]
    pub fn is_nonheap_root(&self, addr: usize) -> bool {
        if addr > self.max_nonheap.get() || addr < self.min_nonheap.get() {
            return false;
        }
        self.nonheap.borrow().contains(&addr)
    }

    /// Scan `[start, end)` conservatively on every collection.
    pub fn register_potential_range(&self, start: usize, end: usize) {
        debug_assert!(start <= end);
        self.potential_ranges.borrow_mut().push((start, end));
    }

    /// A new handle holding `ptr` (or nothing).
    #[must_use]
    pub fn new_handle(&self, ptr: Option<NonNull<u8>>) -> RootHandle {
        let slot = Rc::new(Cell::new(ptr.map_or(0, |p| p.as_ptr() as usize)));
        let mut table = self.handles.borrow_mut();
        let id = table.next_id;
        table.next_id += 1;
        table.slots.insert(id, Rc::clone(&slot));
        RootHandle {
            slot,
            id,
            table: Rc::clone(&self.handles),
        }
    }

    /// Number of live root handles.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.handles.borrow().slots.len()
    }

    /// Number of permanent roots.
    #[must_use]
    pub fn permanent_count(&self) -> usize {
        self.permanent.borrow().len()
    }

    /// Feed handles, permanent roots and potential ranges to `visitor`.
    pub fn visit_roots(&self, visitor: &mut GcVisitor<'_>) {
        let handle_values: Vec<usize> = self
            .handles
            .borrow()
            .slots
            .values()
            .map(|slot| slot.get())
            .collect();
        for value in handle_values {
            visitor.visit(value as *const u8);
        }

        let permanent: Vec<usize> = self.permanent.borrow().iter().copied().collect();
        for addr in permanent {
            visitor.visit(addr as *const u8);
        }

        let ranges = self.potential_ranges.borrow().clone();
        for (start, end) in ranges {
            // SAFETY: registrants promise the range stays readable.
            unsafe { visitor.visit_potential_range(start as *const usize, end as *const usize) };
        }
    }

    /// Forget everything. Outstanding handles detach and keep working as
    /// plain cells.
    pub fn clear(&self) {
        self.permanent.borrow_mut().clear();
        self.nonheap.borrow_mut().clear();
        self.min_nonheap.set(usize::MAX);
        self.max_nonheap.set(0);
        self.potential_ranges.borrow_mut().clear();
        self.handles.borrow_mut().slots.clear();
    }
}

/// A registered slot holding one managed pointer.
///
/// Registration lasts as long as the handle.
#[derive(Debug)]
pub struct RootHandle {
    slot: Rc<Cell<usize>>,
    id: u64,
    table: Rc<RefCell<HandleTable>>,
}

impl RootHandle {
    /// Current value.
    #[must_use]
    pub fn get(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.slot.get() as *mut u8)
    }

    /// Replace the value.
    pub fn set(&self, ptr: Option<NonNull<u8>>) {
        self.slot.set(ptr.map_or(0, |p| p.as_ptr() as usize));
    }
}

impl Drop for RootHandle {
    fn drop(&mut self) {
        self.table.borrow_mut().slots.remove(&self.id);
    }
}
