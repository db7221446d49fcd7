//! The tracing cursor handed to root sources and visit callbacks.

use std::mem::size_of;
use std::ptr::NonNull;

use crate::config::GcConfig;
use crate::error::{GcError, OrFatal};
use crate::header::GcAllocation;
use crate::heap::Heap;
use crate::roots::RootRegistry;
use crate::trace_stack::TraceStack;

const WORD: usize = size_of::<usize>();

/// Reports references to the collector during marking.
///
/// `visit` and `visit_range` take definite references; the `potential`
/// variants take arbitrary words and silently drop anything that does not
/// resolve to an allocation.
pub struct GcVisitor<'a> {
    stack: TraceStack,
    heap: &'a dyn Heap,
    roots: &'a RootRegistry,
    max_range: usize,
}

impl<'a> GcVisitor<'a> {
    pub(crate) fn new(heap: &'a dyn Heap, roots: &'a RootRegistry, config: &GcConfig) -> Self {
        Self {
            stack: TraceStack::new(config.trace_chunk_size, config.max_free_chunks),
            heap,
            roots,
            max_range: config.max_scan_range_bytes,
        }
    }

    /// Treat `ptr` as a definite reference.
    ///
    /// Null and registered non-heap roots are ignored. Anything else outside
    /// the heap, or inside it but not at the start of an allocation's
    /// payload, is fatal.
    pub fn visit<T>(&mut self, ptr: *const T) {
        self.try_visit(ptr as usize).or_fatal();
    }

    pub(crate) fn try_visit(&mut self, addr: usize) -> Result<(), GcError> {
        if !self.heap.in_arena_bounds(addr) {
            if addr == 0 || self.roots.is_nonheap_root(addr) {
                return Ok(());
            }
            return Err(GcError::ForeignReference(addr));
        }

        match self.heap.get_allocation_from_interior_pointer(addr) {
            Some(alloc) if GcAllocation::user_data(alloc).as_ptr() as usize == addr => {
                // SAFETY: `addr` is the payload of a live allocation.
                unsafe { self.stack.push(GcAllocation::user_data(alloc)) };
                Ok(())
            }
            _ => Err(GcError::MisalignedReference(addr)),
        }
    }

    /// Treat every word in `[start, end)` as a definite reference.
    ///
    /// # Safety
    ///
    /// The range must be readable.
    pub unsafe fn visit_range(&mut self, start: *const usize, end: *const usize) {
        unsafe { self.try_visit_range(start, end) }.or_fatal();
    }

    pub(crate) unsafe fn try_visit_range(
        &mut self,
        start: *const usize,
        end: *const usize,
    ) -> Result<(), GcError> {
        let (mut cur, end) = self.check_range(start, end)?;
        while cur + WORD <= end {
            self.try_visit(unsafe { *(cur as *const usize) })?;
            cur += WORD;
        }
        Ok(())
    }

    /// Treat `word` as a possible pointer, interior or not.
    pub fn visit_potential(&mut self, word: usize) {
        if let Some(alloc) = self.heap.get_allocation_from_interior_pointer(word) {
            // SAFETY: the lookup only returns live allocations.
            unsafe { self.stack.push(GcAllocation::user_data(alloc)) };
        }
    }

    /// Treat every word in `[start, end)` as a possible pointer.
    ///
    /// # Safety
    ///
    /// The range must be readable.
    pub unsafe fn visit_potential_range(&mut self, start: *const usize, end: *const usize) {
        let (mut cur, end) = self.check_range(start, end).or_fatal();
        while cur + WORD <= end {
            // SAFETY: the caller guarantees the range is readable.
            let word = unsafe { std::ptr::read_unaligned(cur as *const usize) };
            self.visit_potential(word);
            cur += WORD;
        }
    }

    fn check_range(
        &self,
        start: *const usize,
        end: *const usize,
    ) -> Result<(usize, usize), GcError> {
        let (start, end) = (start as usize, end as usize);
        let len = end.saturating_sub(start);
        if len > self.max_range {
            return Err(GcError::RangeTooLarge(len));
        }
        debug_assert_eq!(start % WORD, 0);
        Ok((start, end))
    }

    /// Whether `addr` resolves to an allocation of the heap being traced.
    #[must_use]
    pub fn is_valid(&self, addr: usize) -> bool {
        self.heap.get_allocation_from_interior_pointer(addr).is_some()
    }

    pub(crate) fn pop(&mut self) -> Option<NonNull<u8>> {
        self.stack.pop()
    }
}

impl std::fmt::Debug for GcVisitor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcVisitor")
            .field("pending", &self.stack.len())
            .field("max_range", &self.max_range)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{scan_size_for, GcKind, HEADER_SIZE};
    use crate::heap::MarkSweepHeap;

    fn setup() -> (MarkSweepHeap, RootRegistry, GcConfig) {
        let config = GcConfig::new()
            .with_arena_size(64 << 20)
            .with_commit_increment(1 << 20);
        (MarkSweepHeap::new(&config).unwrap(), RootRegistry::new(), config)
    }

    fn alloc(heap: &mut MarkSweepHeap, payload: usize) -> NonNull<u8> {
        let a = heap.alloc(payload + HEADER_SIZE).unwrap();
        unsafe { GcAllocation::init(a, GcKind::Untracked, scan_size_for(payload).unwrap()) };
        GcAllocation::user_data(a)
    }

    fn is_marked(p: NonNull<u8>) -> bool {
        unsafe { GcAllocation::from_user_data(p).as_ref() }.is_marked()
    }

    #[test]
    fn test_visit_pushes_exact_pointer() {
        let (mut heap, roots, config) = setup();
        let p = alloc(&mut heap, 32);
        let mut visitor = GcVisitor::new(&heap, &roots, &config);
        visitor.visit(p.as_ptr());
        assert!(is_marked(p));
        assert_eq!(visitor.pop(), Some(p));
        assert_eq!(visitor.pop(), None);
    }

    #[test]
    fn test_visit_ignores_null_and_nonheap_roots() {
        let (heap, roots, config) = setup();
        let singleton = Box::new([0usize; 2]);
        let addr = NonNull::from(&*singleton).cast::<u8>();
        roots.register_nonheap_root(addr, 16).unwrap();
        let mut visitor = GcVisitor::new(&heap, &roots, &config);
        visitor.visit(std::ptr::null::<u8>());
        visitor.visit(addr.as_ptr());
        assert_eq!(visitor.pop(), None);
    }

    #[test]
    fn test_foreign_pointer_is_rejected() {
        let (heap, roots, config) = setup();
        let local = 7usize;
        let mut visitor = GcVisitor::new(&heap, &roots, &config);
        let err = visitor.try_visit(std::ptr::addr_of!(local) as usize).unwrap_err();
        assert!(matches!(err, GcError::ForeignReference(_)));
    }

    #[test]
    fn test_interior_definite_pointer_is_rejected() {
        let (mut heap, roots, config) = setup();
        let p = alloc(&mut heap, 32);
        let mut visitor = GcVisitor::new(&heap, &roots, &config);
        let err = visitor.try_visit(p.as_ptr() as usize + 8).unwrap_err();
        assert!(matches!(err, GcError::MisalignedReference(_)));
    }

    #[test]
    fn test_potential_resolves_interior_pointers() {
        let (mut heap, roots, config) = setup();
        let p = alloc(&mut heap, 64);
        let mut visitor = GcVisitor::new(&heap, &roots, &config);
        visitor.visit_potential(p.as_ptr() as usize + 17);
        visitor.visit_potential(0xdead_beef);
        assert_eq!(visitor.pop(), Some(p));
        assert_eq!(visitor.pop(), None);
    }

    #[test]
    fn test_potential_range_scans_words() {
        let (mut heap, roots, config) = setup();
        let p = alloc(&mut heap, 16);
        let q = alloc(&mut heap, 16);
        let words = [1usize, p.as_ptr() as usize, 3, q.as_ptr() as usize + 4];
        let mut visitor = GcVisitor::new(&heap, &roots, &config);
        unsafe {
            visitor.visit_potential_range(words.as_ptr(), words.as_ptr().add(words.len()));
        }
        assert!(is_marked(p));
        assert!(is_marked(q));
    }

    #[test]
    fn test_oversized_range_is_rejected() {
        let (heap, roots, mut config) = setup();
        config.max_scan_range_bytes = 64;
        let visitor = GcVisitor::new(&heap, &roots, &config);
        let start = 0x1000 as *const usize;
        let end = 0x2000 as *const usize;
        assert!(matches!(
            visitor.check_range(start, end),
            Err(GcError::RangeTooLarge(0x1000))
        ));
    }
}
