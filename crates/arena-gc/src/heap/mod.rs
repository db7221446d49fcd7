//! The heap strategy contract shared by every collector.
//!
//! A heap hands out header-prefixed allocations from its arenas and knows how
//! to find, release and sweep them. It does not know about roots, marking or
//! the object model: the collector drives it through this trait and supplies a
//! [`Reclaim`] policy when sweeping.

use std::ptr::NonNull;

use crate::error::GcError;
use crate::header::GcAllocation;

mod mark_sweep;
mod page_runs;
mod semispace;

pub use mark_sweep::MarkSweepHeap;
pub use page_runs::PageRunSpace;
pub use semispace::SemiSpaceHeap;

/// Decides the fate of an unreachable allocation during a sweep.
pub trait Reclaim {
    /// Finalize `alloc` ahead of releasing its memory.
    ///
    /// Returns `Ok(false)` when the allocation must outlive this sweep because
    /// it is still weakly referenced; the heap then leaves it allocated and
    /// reports it back to the caller.
    ///
    /// # Errors
    ///
    /// Any error is a broken invariant and aborts the sweep.
    fn before_free(&mut self, alloc: NonNull<GcAllocation>) -> Result<bool, GcError>;
}

impl<F> Reclaim for F
where
    F: FnMut(NonNull<GcAllocation>) -> Result<bool, GcError>,
{
    fn before_free(&mut self, alloc: NonNull<GcAllocation>) -> Result<bool, GcError> {
        self(alloc)
    }
}

/// Counters produced by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Allocations whose memory went back to the heap.
    pub objects_freed: usize,
    /// Capacity of those allocations, headers included.
    pub bytes_freed: usize,
    /// Allocations that survived (marked or deferred).
    pub objects_surviving: usize,
}

/// Occupancy of one region class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionStatistics {
    /// Region name, e.g. `"small"` or `"tospace"`.
    pub name: &'static str,
    /// Bytes committed in the region's arena.
    pub committed_bytes: usize,
    /// Bytes the arena cursor has handed out.
    pub arena_used_bytes: usize,
    /// Live allocations.
    pub live_objects: usize,
    /// Capacity of the live allocations, headers included.
    pub live_bytes: usize,
}

/// Snapshot returned by [`Heap::dump_statistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStatistics {
    /// One entry per region class.
    pub regions: Vec<RegionStatistics>,
}

impl HeapStatistics {
    /// Live allocations across all regions.
    #[must_use]
    pub fn total_live_objects(&self) -> usize {
        self.regions.iter().map(|r| r.live_objects).sum()
    }

    /// Live bytes across all regions.
    #[must_use]
    pub fn total_live_bytes(&self) -> usize {
        self.regions.iter().map(|r| r.live_bytes).sum()
    }

    /// Committed bytes across all regions.
    #[must_use]
    pub fn total_committed_bytes(&self) -> usize {
        self.regions.iter().map(|r| r.committed_bytes).sum()
    }

    /// Entry for a region by name.
    #[must_use]
    pub fn region(&self, name: &str) -> Option<&RegionStatistics> {
        self.regions.iter().find(|r| r.name == name)
    }
}

/// Memory provider for a collector.
///
/// Sizes passed to `alloc` and `realloc` include the allocation header.
pub trait Heap {
    /// Allocate at least `bytes` bytes. The header is left for the caller to
    /// initialize.
    ///
    /// # Errors
    ///
    /// Arena exhaustion or an OS commit failure.
    fn alloc(&mut self, bytes: usize) -> Result<NonNull<GcAllocation>, GcError>;

    /// Resize an allocation.
    ///
    /// Keeps `alloc` in place when its capacity is at least `bytes` and less
    /// than twice `bytes`. Otherwise copies `min(capacity, bytes)` bytes
    /// (header included) into a fresh allocation, passes the old one to
    /// `release` and returns its memory to the heap.
    ///
    /// # Errors
    ///
    /// Fails like [`Heap::alloc`], or with [`GcError::NotAllocated`].
    fn realloc(
        &mut self,
        alloc: NonNull<GcAllocation>,
        bytes: usize,
        release: &mut dyn FnMut(NonNull<GcAllocation>) -> Result<(), GcError>,
    ) -> Result<NonNull<GcAllocation>, GcError>;

    /// Return an allocation's memory to the heap.
    ///
    /// # Errors
    ///
    /// [`GcError::NotAllocated`] if `alloc` is not live in this heap.
    fn free(&mut self, alloc: NonNull<GcAllocation>) -> Result<(), GcError>;

    /// The allocation whose cell contains `addr`, if any.
    fn get_allocation_from_interior_pointer(&self, addr: usize) -> Option<NonNull<GcAllocation>>;

    /// Whether `addr` lies inside one of this heap's reserved windows.
    fn in_arena_bounds(&self, addr: usize) -> bool;

    /// Usable bytes behind a live allocation, header included.
    fn capacity_of(&self, alloc: NonNull<GcAllocation>) -> Option<usize>;

    /// Sweep: release every unmarked allocation, clear the mark on survivors
    /// and append deferred allocations to `weakly_referenced`.
    ///
    /// # Errors
    ///
    /// Propagates errors from `reclaim`.
    fn free_unmarked(
        &mut self,
        reclaim: &mut dyn Reclaim,
        weakly_referenced: &mut Vec<NonNull<u8>>,
    ) -> Result<SweepStats, GcError>;

    /// Maintenance before a collection cycle.
    ///
    /// # Errors
    ///
    /// OS failures during maintenance.
    fn prepare_for_collection(&mut self) -> Result<(), GcError>;

    /// Maintenance after a collection cycle.
    ///
    /// # Errors
    ///
    /// OS failures during maintenance.
    fn cleanup_after_collection(&mut self) -> Result<(), GcError>;

    /// Occupancy snapshot.
    fn dump_statistics(&self) -> HeapStatistics;
}

/// Copy `len` bytes between two allocations and hand the source to `release`.
///
/// # Safety
///
/// Both allocations must be live and valid for `len` bytes and must not overlap.
pub(crate) unsafe fn move_contents(
    from: NonNull<GcAllocation>,
    to: NonNull<GcAllocation>,
    len: usize,
) {
    unsafe {
        std::ptr::copy_nonoverlapping(from.cast::<u8>().as_ptr(), to.cast::<u8>().as_ptr(), len);
    }
}
