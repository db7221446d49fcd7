//! Two-space heap for the semispace collector.
//!
//! Allocation always bumps `tospace`. A flip swaps the roles of the two
//! spaces; nothing is copied, so allocations made before a flip stay where
//! they are and remain addressable through the per-space index.

use std::collections::BTreeMap;
use std::mem::size_of;
use std::ptr::NonNull;

use super::{move_contents, Heap, HeapStatistics, Reclaim, RegionStatistics, SweepStats};
use crate::arena::Arena;
use crate::config::GcConfig;
use crate::error::GcError;
use crate::header::{GcAllocation, ALLOC_ALIGN};

/// Prefix in front of every allocation header in a semispace.
#[repr(C)]
struct Obj {
    size: usize,
    /// Relocation target once a copying cycle has moved the object. Always
    /// null under the flip-only cycle.
    forward: *mut Obj,
}

const OBJ_PREFIX: usize = size_of::<Obj>();

fn obj_of(alloc: NonNull<GcAllocation>) -> NonNull<Obj> {
    // SAFETY: every semispace header is preceded by its prefix.
    unsafe { alloc.cast::<u8>().sub(OBJ_PREFIX).cast() }
}

#[derive(Debug)]
struct Space {
    arena: Arena,
    /// Header address to capacity (header included).
    objects: BTreeMap<usize, usize>,
}

impl Space {
    fn lookup(&self, addr: usize) -> Option<NonNull<GcAllocation>> {
        if !self.arena.contains(addr) {
            return None;
        }
        let (&start, &len) = self.objects.range(..=addr).next_back()?;
        if addr < start + len {
            NonNull::new(start as *mut GcAllocation)
        } else {
            None
        }
    }

    fn sweep(
        &mut self,
        reclaim: &mut dyn Reclaim,
        weakly_referenced: &mut Vec<NonNull<u8>>,
        stats: &mut SweepStats,
    ) -> Result<(), GcError> {
        let entries: Vec<(usize, usize)> = self.objects.iter().map(|(&a, &l)| (a, l)).collect();
        for (addr, len) in entries {
            // SAFETY: indexed allocations carry an initialized header.
            let alloc = unsafe { NonNull::new_unchecked(addr as *mut GcAllocation) };
            let header = unsafe { alloc.as_ref() };
            if header.is_marked() {
                header.clear_mark();
                stats.objects_surviving += 1;
            } else if reclaim.before_free(alloc)? {
                self.objects.remove(&addr);
                stats.objects_freed += 1;
                stats.bytes_freed += len;
            } else {
                weakly_referenced.push(GcAllocation::user_data(alloc));
                stats.objects_surviving += 1;
            }
        }
        Ok(())
    }

    fn statistics(&self, name: &'static str) -> RegionStatistics {
        RegionStatistics {
            name,
            committed_bytes: self.arena.committed(),
            arena_used_bytes: self.arena.used(),
            live_objects: self.objects.len(),
            live_bytes: self.objects.values().sum(),
        }
    }
}

/// A pair of equally sized arenas that trade roles on every flip.
#[derive(Debug)]
pub struct SemiSpaceHeap {
    fromspace: Space,
    tospace: Space,
}

impl SemiSpaceHeap {
    /// Reserve both spaces.
    ///
    /// # Errors
    ///
    /// Fails if either arena cannot be reserved.
    pub fn new(config: &GcConfig) -> Result<Self, GcError> {
        let space = || -> Result<Space, GcError> {
            Ok(Space {
                arena: Arena::reserve(
                    config.arena_size,
                    sys_alloc::page_size(),
                    config.initial_commit,
                    config.commit_increment,
                )?,
                objects: BTreeMap::new(),
            })
        };
        Ok(Self {
            fromspace: space()?,
            tospace: space()?,
        })
    }

    /// Swap the roles of the two spaces.
    pub fn flip(&mut self) {
        std::mem::swap(&mut self.tospace, &mut self.fromspace);
    }

    /// Start of the space allocations currently go to.
    #[must_use]
    pub const fn tospace_start(&self) -> usize {
        self.tospace.arena.start()
    }

    fn alloc_obj(&mut self, bytes: usize) -> Result<NonNull<Obj>, GcError> {
        let total = (OBJ_PREFIX + bytes + ALLOC_ALIGN - 1) & !(ALLOC_ALIGN - 1);
        let obj = self.tospace.arena.alloc_from_arena(total)?;

        // Keep fromspace committed as far as tospace so a flip never lands on
        // unbacked pages.
        let needed = self.tospace.arena.committed();
        let have = self.fromspace.arena.committed();
        if needed > have {
            self.fromspace.arena.extend_mapping(needed - have)?;
        }

        Ok(obj.cast())
    }
}

impl Heap for SemiSpaceHeap {
    fn alloc(&mut self, bytes: usize) -> Result<NonNull<GcAllocation>, GcError> {
        let obj = self.alloc_obj(bytes)?;
        // SAFETY: `obj` is freshly bumped, committed and suitably aligned.
        unsafe {
            obj.as_ptr().write(Obj {
                size: bytes,
                forward: std::ptr::null_mut(),
            });
        }
        // SAFETY: the header directly follows the prefix.
        let alloc = unsafe { obj.cast::<u8>().add(OBJ_PREFIX).cast::<GcAllocation>() };
        self.tospace.objects.insert(alloc.as_ptr() as usize, bytes);
        Ok(alloc)
    }

    fn realloc(
        &mut self,
        alloc: NonNull<GcAllocation>,
        bytes: usize,
        release: &mut dyn FnMut(NonNull<GcAllocation>) -> Result<(), GcError>,
    ) -> Result<NonNull<GcAllocation>, GcError> {
        let size = self
            .capacity_of(alloc)
            .ok_or(GcError::NotAllocated(alloc.as_ptr() as usize))?;
        if size >= bytes && size < bytes * 2 {
            return Ok(alloc);
        }

        let moved = self.alloc(bytes)?;
        // SAFETY: both allocations are live, distinct and at least this long.
        unsafe { move_contents(alloc, moved, size.min(bytes)) };
        release(alloc)?;
        self.free(alloc)?;
        Ok(moved)
    }

    fn free(&mut self, alloc: NonNull<GcAllocation>) -> Result<(), GcError> {
        let addr = alloc.as_ptr() as usize;
        if self.tospace.objects.remove(&addr).is_some()
            || self.fromspace.objects.remove(&addr).is_some()
        {
            debug_assert!(unsafe { obj_of(alloc).as_ref() }.forward.is_null());
            Ok(())
        } else {
            Err(GcError::NotAllocated(addr))
        }
    }

    fn get_allocation_from_interior_pointer(&self, addr: usize) -> Option<NonNull<GcAllocation>> {
        self.tospace
            .lookup(addr)
            .or_else(|| self.fromspace.lookup(addr))
    }

    fn in_arena_bounds(&self, addr: usize) -> bool {
        self.tospace.arena.window_contains(addr) || self.fromspace.arena.window_contains(addr)
    }

    fn capacity_of(&self, alloc: NonNull<GcAllocation>) -> Option<usize> {
        let addr = alloc.as_ptr() as usize;
        let indexed =
            self.tospace.objects.contains_key(&addr) || self.fromspace.objects.contains_key(&addr);
        // SAFETY: indexed allocations keep their prefix intact.
        indexed.then(|| unsafe { obj_of(alloc).as_ref() }.size)
    }

    fn free_unmarked(
        &mut self,
        reclaim: &mut dyn Reclaim,
        weakly_referenced: &mut Vec<NonNull<u8>>,
    ) -> Result<SweepStats, GcError> {
        let mut stats = SweepStats::default();
        self.tospace.sweep(reclaim, weakly_referenced, &mut stats)?;
        self.fromspace.sweep(reclaim, weakly_referenced, &mut stats)?;
        Ok(stats)
    }

    fn prepare_for_collection(&mut self) -> Result<(), GcError> {
        Ok(())
    }

    fn cleanup_after_collection(&mut self) -> Result<(), GcError> {
        Ok(())
    }

    fn dump_statistics(&self) -> HeapStatistics {
        HeapStatistics {
            regions: vec![
                self.tospace.statistics("tospace"),
                self.fromspace.statistics("fromspace"),
            ],
        }
    }
}
