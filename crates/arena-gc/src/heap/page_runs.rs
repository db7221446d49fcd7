//! Page-granular spaces for large and huge allocations.
//!
//! Every allocation occupies a whole run of pages. Freed runs are kept in an
//! address-ordered map, reused first-fit, and coalesced with their neighbours
//! between collections.

use std::collections::BTreeMap;
use std::ptr::NonNull;

use super::{Reclaim, RegionStatistics, SweepStats};
use crate::arena::Arena;
use crate::error::GcError;
use crate::header::GcAllocation;

#[derive(Debug, Clone, Copy)]
struct FreeRun {
    len: usize,
    /// Freed since the last purge.
    dirty: bool,
}

/// A space whose allocations are runs of whole pages.
#[derive(Debug)]
pub struct PageRunSpace {
    name: &'static str,
    arena: Arena,
    /// Live runs: start address to length.
    objects: BTreeMap<usize, usize>,
    free_runs: BTreeMap<usize, FreeRun>,
    /// Release the physical pages of freed runs during cleanup.
    purge_freed: bool,
    live_bytes: usize,
}

impl PageRunSpace {
    /// Wrap `arena`. With `purge_freed`, freed runs are handed back to the OS
    /// after each collection.
    #[must_use]
    pub const fn new(name: &'static str, arena: Arena, purge_freed: bool) -> Self {
        Self {
            name,
            arena,
            objects: BTreeMap::new(),
            free_runs: BTreeMap::new(),
            purge_freed,
            live_bytes: 0,
        }
    }

    fn run_length(bytes: usize) -> usize {
        let page = sys_alloc::page_size();
        (bytes + page - 1) & !(page - 1)
    }

    /// Allocate a run of at least `bytes` bytes.
    ///
    /// # Errors
    ///
    /// Arena exhaustion or an OS commit failure.
    pub fn alloc(&mut self, bytes: usize) -> Result<NonNull<GcAllocation>, GcError> {
        let len = Self::run_length(bytes);

        let reused = self
            .free_runs
            .iter()
            .find(|(_, run)| run.len >= len)
            .map(|(&start, &run)| (start, run));

        let start = if let Some((start, run)) = reused {
            self.free_runs.remove(&start);
            if run.len > len {
                self.free_runs.insert(
                    start + len,
                    FreeRun {
                        len: run.len - len,
                        dirty: run.dirty,
                    },
                );
            }
            start
        } else {
            self.arena.alloc_from_arena(len)?.as_ptr() as usize
        };

        self.objects.insert(start, len);
        self.live_bytes += len;
        // SAFETY: run starts are page aligned addresses inside the arena.
        Ok(unsafe { NonNull::new_unchecked(start as *mut GcAllocation) })
    }

    /// Return a live run to the free map.
    ///
    /// # Errors
    ///
    /// [`GcError::NotAllocated`] if `alloc` does not start a live run.
    pub fn free(&mut self, alloc: NonNull<GcAllocation>) -> Result<(), GcError> {
        let start = alloc.as_ptr() as usize;
        let len = self
            .objects
            .remove(&start)
            .ok_or(GcError::NotAllocated(start))?;
        self.release_run(start, len);
        Ok(())
    }

    fn release_run(&mut self, start: usize, len: usize) {
        self.live_bytes -= len;
        self.free_runs.insert(
            start,
            FreeRun {
                len,
                dirty: self.purge_freed,
            },
        );
    }

    /// The live run containing `addr`.
    #[must_use]
    pub fn lookup(&self, addr: usize) -> Option<NonNull<GcAllocation>> {
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

    /// Capacity of the run starting at `alloc`.
    #[must_use]
    pub fn capacity_of(&self, alloc: NonNull<GcAllocation>) -> Option<usize> {
        self.objects.get(&(alloc.as_ptr() as usize)).copied()
    }

    /// Whether `addr` lies in this space's reserved window.
    #[must_use]
    pub const fn window_contains(&self, addr: usize) -> bool {
        self.arena.window_contains(addr)
    }

    /// Sweep this space. See [`super::Heap::free_unmarked`].
    ///
    /// # Errors
    ///
    /// Propagates errors from `reclaim`.
    pub fn sweep(
        &mut self,
        reclaim: &mut dyn Reclaim,
        weakly_referenced: &mut Vec<NonNull<u8>>,
        stats: &mut SweepStats,
    ) -> Result<(), GcError> {
        let runs: Vec<(usize, usize)> = self.objects.iter().map(|(&s, &l)| (s, l)).collect();
        for (start, len) in runs {
            // SAFETY: `start` heads a live run with an initialized header.
            let alloc = unsafe { NonNull::new_unchecked(start as *mut GcAllocation) };
            let header = unsafe { alloc.as_ref() };
            if header.is_marked() {
                header.clear_mark();
                stats.objects_surviving += 1;
                continue;
            }
            if reclaim.before_free(alloc)? {
                self.objects.remove(&start);
                self.release_run(start, len);
                stats.objects_freed += 1;
                stats.bytes_freed += len;
            } else {
                weakly_referenced.push(GcAllocation::user_data(alloc));
                stats.objects_surviving += 1;
            }
        }
        Ok(())
    }

    /// Merge adjacent free runs.
    pub fn coalesce(&mut self) {
        let mut merged: BTreeMap<usize, FreeRun> = BTreeMap::new();
        let mut last: Option<(usize, FreeRun)> = None;
        for (&start, &run) in &self.free_runs {
            match last.as_mut() {
                Some((prev_start, prev)) if *prev_start + prev.len == start => {
                    prev.len += run.len;
                    prev.dirty |= run.dirty;
                }
                _ => {
                    if let Some((s, r)) = last.take() {
                        merged.insert(s, r);
                    }
                    last = Some((start, run));
                }
            }
        }
        if let Some((s, r)) = last {
            merged.insert(s, r);
        }
        self.free_runs = merged;
    }

    /// Release the pages of every run freed since the last purge.
    ///
    /// # Errors
    ///
    /// OS failure from the purge call.
    pub fn purge_dirty(&mut self) -> Result<(), GcError> {
        for (&start, run) in &mut self.free_runs {
            if run.dirty {
                self.arena.purge(start, run.len)?;
                run.dirty = false;
            }
        }
        Ok(())
    }

    /// Number of free runs, for tests and statistics.
    #[must_use]
    pub fn free_run_count(&self) -> usize {
        self.free_runs.len()
    }

    /// Occupancy of this space.
    #[must_use]
    pub fn statistics(&self) -> RegionStatistics {
        RegionStatistics {
            name: self.name,
            committed_bytes: self.arena.committed(),
            arena_used_bytes: self.arena.used(),
            live_objects: self.objects.len(),
            live_bytes: self.live_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(purge: bool) -> PageRunSpace {
        let arena = Arena::reserve(64 << 20, 4096, 0, 1 << 20).unwrap();
        PageRunSpace::new("large", arena, purge)
    }

    #[test]
    fn test_runs_are_page_granular() {
        let mut s = space(false);
        let page = sys_alloc::page_size();
        let a = s.alloc(page + 1).unwrap();
        let b = s.alloc(10).unwrap();
        assert_eq!(s.capacity_of(a), Some(2 * page));
        assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 2 * page);
    }

    #[test]
    fn test_interior_lookup() {
        let mut s = space(false);
        let page = sys_alloc::page_size();
        let a = s.alloc(3 * page).unwrap();
        let base = a.as_ptr() as usize;
        assert_eq!(s.lookup(base + page + 17), Some(a));
        assert_eq!(s.lookup(base + 3 * page), None);
        s.free(a).unwrap();
        assert_eq!(s.lookup(base), None);
    }

    #[test]
    fn test_freed_run_is_reused_and_split() {
        let mut s = space(false);
        let page = sys_alloc::page_size();
        let a = s.alloc(4 * page).unwrap();
        let _guard = s.alloc(page).unwrap();
        s.free(a).unwrap();
        let b = s.alloc(page).unwrap();
        assert_eq!(b, a);
        assert_eq!(s.free_run_count(), 1);
    }

    #[test]
    fn test_coalesce_merges_neighbours() {
        let mut s = space(true);
        let page = sys_alloc::page_size();
        let a = s.alloc(page).unwrap();
        let b = s.alloc(page).unwrap();
        let c = s.alloc(page).unwrap();
        s.free(a).unwrap();
        s.free(c).unwrap();
        s.free(b).unwrap();
        assert_eq!(s.free_run_count(), 3);
        s.coalesce();
        assert_eq!(s.free_run_count(), 1);
        s.purge_dirty().unwrap();
        let big = s.alloc(3 * page).unwrap();
        assert_eq!(big, a);
    }

    #[test]
    fn test_double_free_is_reported() {
        let mut s = space(false);
        let a = s.alloc(100).unwrap();
        s.free(a).unwrap();
        assert!(matches!(s.free(a), Err(GcError::NotAllocated(_))));
    }
}
