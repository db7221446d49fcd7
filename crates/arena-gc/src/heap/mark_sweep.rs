//! Non-moving heap used by the mark-sweep collector.
//!
//! Three region classes, each with its own reserved arena:
//!
//! - **small**: 64 KiB blocks carved into equal cells of one size class
//!   (big bag of pages). Cell metadata lives out of band in [`Block`], so the
//!   block containing an address is found by shifting its offset.
//! - **large**: page runs up to [`MAX_LARGE_SIZE`].
//! - **huge**: page runs above that; freed runs are purged after collection.

use std::ptr::NonNull;

use super::page_runs::PageRunSpace;
use super::{move_contents, Heap, HeapStatistics, Reclaim, RegionStatistics, SweepStats};
use crate::arena::Arena;
use crate::config::GcConfig;
use crate::error::GcError;
use crate::header::GcAllocation;

/// Size of a small-object block.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Cell sizes for small allocations, header included.
pub const SIZE_CLASSES: [usize; 27] = [
    16, 32, 48, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 640, 768, 896, 1024,
    1280, 1536, 1792, 2048, 2560, 3072, 3584,
];

/// Largest allocation served from a small block.
pub const MAX_SMALL_SIZE: usize = SIZE_CLASSES[SIZE_CLASSES.len() - 1];

/// Largest allocation served from the large space.
pub const MAX_LARGE_SIZE: usize = 1024 * 1024;

const NUM_CLASSES: usize = SIZE_CLASSES.len();

fn size_class_index(bytes: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&size| size >= bytes)
}

/// Out-of-band metadata for one small block.
#[derive(Debug)]
struct Block {
    size_class: usize,
    cell_size: usize,
    cell_count: usize,
    /// Cells at or past this index have never been handed out.
    bump: usize,
    free_cells: Vec<u32>,
    /// One bit per cell.
    allocated: Vec<u64>,
    live: usize,
    /// Listed in the partial list of its size class.
    in_partial: bool,
}

impl Block {
    fn new(size_class: usize) -> Self {
        let cell_size = SIZE_CLASSES[size_class];
        let cell_count = BLOCK_SIZE / cell_size;
        Self {
            size_class,
            cell_size,
            cell_count,
            bump: 0,
            free_cells: Vec::new(),
            allocated: vec![0; cell_count.div_ceil(64)],
            live: 0,
            in_partial: false,
        }
    }

    fn is_allocated(&self, index: usize) -> bool {
        self.allocated[index / 64] & (1 << (index % 64)) != 0
    }

    fn set_allocated(&mut self, index: usize) {
        self.allocated[index / 64] |= 1 << (index % 64);
    }

    fn clear_allocated(&mut self, index: usize) {
        self.allocated[index / 64] &= !(1 << (index % 64));
    }

    fn alloc_cell(&mut self) -> Option<usize> {
        let index = if let Some(i) = self.free_cells.pop() {
            i as usize
        } else if self.bump < self.cell_count {
            self.bump += 1;
            self.bump - 1
        } else {
            return None;
        };
        self.set_allocated(index);
        self.live += 1;
        Some(index)
    }

    fn free_cell(&mut self, index: usize) {
        self.clear_allocated(index);
        #[allow(clippy::cast_possible_truncation)]
        self.free_cells.push(index as u32);
        self.live -= 1;
    }

    const fn is_full(&self) -> bool {
        self.live == self.cell_count
    }
}

/// The small-object region.
#[derive(Debug)]
struct SmallSpace {
    arena: Arena,
    /// Indexed by block number within the arena; `None` for retired blocks.
    blocks: Vec<Option<Block>>,
    partial: [Vec<usize>; NUM_CLASSES],
    /// Retired block numbers ready for any size class.
    empty: Vec<usize>,
    pending_purge: Vec<usize>,
}

impl SmallSpace {
    fn new(arena: Arena) -> Self {
        Self {
            arena,
            blocks: Vec::new(),
            partial: std::array::from_fn(|_| Vec::new()),
            empty: Vec::new(),
            pending_purge: Vec::new(),
        }
    }

    fn block_base(&self, index: usize) -> usize {
        self.arena.start() + index * BLOCK_SIZE
    }

    fn new_block(&mut self, size_class: usize) -> Result<usize, GcError> {
        let index = if let Some(index) = self.empty.pop() {
            index
        } else {
            let base = self.arena.alloc_from_arena(BLOCK_SIZE)?.as_ptr() as usize;
            let index = (base - self.arena.start()) / BLOCK_SIZE;
            if self.blocks.len() <= index {
                self.blocks.resize_with(index + 1, || None);
            }
            index
        };
        let mut block = Block::new(size_class);
        block.in_partial = true;
        self.blocks[index] = Some(block);
        self.partial[size_class].push(index);
        Ok(index)
    }

    fn alloc(&mut self, size_class: usize) -> Result<NonNull<GcAllocation>, GcError> {
        loop {
            let last = self.partial[size_class].last().copied();
            let index = match last {
                Some(index) => index,
                None => self.new_block(size_class)?,
            };
            let base = self.block_base(index);
            let Some(block) = self.blocks[index].as_mut() else {
                self.partial[size_class].pop();
                continue;
            };
            let Some(cell) = block.alloc_cell() else {
                block.in_partial = false;
                self.partial[size_class].pop();
                continue;
            };
            if block.is_full() {
                block.in_partial = false;
                self.partial[size_class].pop();
            }
            let addr = base + cell * block.cell_size;
            // SAFETY: cells lie inside a committed block.
            return Ok(unsafe { NonNull::new_unchecked(addr as *mut GcAllocation) });
        }
    }

    /// Block number, block and cell number for `addr`, if the cell is live.
    fn locate(&self, addr: usize) -> Option<(usize, &Block, usize)> {
        if !self.arena.contains(addr) {
            return None;
        }
        let index = (addr - self.arena.start()) / BLOCK_SIZE;
        let block = self.blocks.get(index)?.as_ref()?;
        let cell = (addr - self.block_base(index)) / block.cell_size;
        if cell >= block.cell_count || !block.is_allocated(cell) {
            return None;
        }
        Some((index, block, cell))
    }

    fn lookup(&self, addr: usize) -> Option<NonNull<GcAllocation>> {
        let (index, block, cell) = self.locate(addr)?;
        NonNull::new((self.block_base(index) + cell * block.cell_size) as *mut GcAllocation)
    }

    fn capacity_of(&self, alloc: NonNull<GcAllocation>) -> Option<usize> {
        let addr = alloc.as_ptr() as usize;
        let (index, block, cell) = self.locate(addr)?;
        (self.block_base(index) + cell * block.cell_size == addr).then_some(block.cell_size)
    }

    fn free(&mut self, alloc: NonNull<GcAllocation>) -> Result<(), GcError> {
        let addr = alloc.as_ptr() as usize;
        let (index, cell) = match self.locate(addr) {
            Some((index, block, cell)) if self.block_base(index) + cell * block.cell_size == addr => {
                (index, cell)
            }
            _ => return Err(GcError::NotAllocated(addr)),
        };
        if let Some(block) = self.blocks[index].as_mut() {
            block.free_cell(cell);
            if !block.in_partial {
                block.in_partial = true;
                self.partial[block.size_class].push(index);
            }
        }
        Ok(())
    }

    fn sweep(
        &mut self,
        reclaim: &mut dyn Reclaim,
        weakly_referenced: &mut Vec<NonNull<u8>>,
        stats: &mut SweepStats,
    ) -> Result<(), GcError> {
        let start = self.arena.start();
        for index in 0..self.blocks.len() {
            let base = start + index * BLOCK_SIZE;
            let Some(block) = self.blocks[index].as_mut() else {
                continue;
            };
            for cell in 0..block.bump {
                if !block.is_allocated(cell) {
                    continue;
                }
                let addr = base + cell * block.cell_size;
                // SAFETY: allocated cells carry an initialized header.
                let alloc = unsafe { NonNull::new_unchecked(addr as *mut GcAllocation) };
                let header = unsafe { alloc.as_ref() };
                if header.is_marked() {
                    header.clear_mark();
                    stats.objects_surviving += 1;
                } else if reclaim.before_free(alloc)? {
                    block.free_cell(cell);
                    stats.objects_freed += 1;
                    stats.bytes_freed += block.cell_size;
                } else {
                    weakly_referenced.push(GcAllocation::user_data(alloc));
                    stats.objects_surviving += 1;
                }
            }
            if block.live == 0 {
                self.blocks[index] = None;
                self.empty.push(index);
                self.pending_purge.push(index);
            }
        }
        self.rebuild_partial_lists();
        Ok(())
    }

    fn rebuild_partial_lists(&mut self) {
        for list in &mut self.partial {
            list.clear();
        }
        for (index, block) in self.blocks.iter_mut().enumerate() {
            if let Some(block) = block {
                block.in_partial = !block.is_full();
                if block.in_partial {
                    self.partial[block.size_class].push(index);
                }
            }
        }
    }

    /// Hand retired blocks' pages back to the OS unless they were reused.
    fn purge_retired(&mut self) -> Result<(), GcError> {
        for index in std::mem::take(&mut self.pending_purge) {
            if self.blocks[index].is_none() {
                self.arena.purge(self.block_base(index), BLOCK_SIZE)?;
            }
        }
        Ok(())
    }

    fn statistics(&self) -> RegionStatistics {
        let (live_objects, live_bytes) = self
            .blocks
            .iter()
            .flatten()
            .fold((0, 0), |(n, b), block| (n + block.live, b + block.live * block.cell_size));
        RegionStatistics {
            name: "small",
            committed_bytes: self.arena.committed(),
            arena_used_bytes: self.arena.used(),
            live_objects,
            live_bytes,
        }
    }
}

/// Heap with small, large and huge region classes.
#[derive(Debug)]
pub struct MarkSweepHeap {
    small: SmallSpace,
    large: PageRunSpace,
    huge: PageRunSpace,
}

impl MarkSweepHeap {
    /// Reserve the three arenas described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if an arena cannot be reserved.
    pub fn new(config: &GcConfig) -> Result<Self, GcError> {
        let reserve = |align| {
            Arena::reserve(
                config.arena_size,
                align,
                config.initial_commit,
                config.commit_increment,
            )
        };
        Ok(Self {
            small: SmallSpace::new(reserve(BLOCK_SIZE)?),
            large: PageRunSpace::new("large", reserve(sys_alloc::page_size())?, false),
            huge: PageRunSpace::new("huge", reserve(sys_alloc::page_size())?, true),
        })
    }
}

impl Heap for MarkSweepHeap {
    fn alloc(&mut self, bytes: usize) -> Result<NonNull<GcAllocation>, GcError> {
        if let Some(size_class) = size_class_index(bytes) {
            self.small.alloc(size_class)
        } else if bytes <= MAX_LARGE_SIZE {
            self.large.alloc(bytes)
        } else {
            self.huge.alloc(bytes)
        }
    }

    fn realloc(
        &mut self,
        alloc: NonNull<GcAllocation>,
        bytes: usize,
        release: &mut dyn FnMut(NonNull<GcAllocation>) -> Result<(), GcError>,
    ) -> Result<NonNull<GcAllocation>, GcError> {
        let capacity = self
            .capacity_of(alloc)
            .ok_or(GcError::NotAllocated(alloc.as_ptr() as usize))?;
        if capacity >= bytes && capacity < bytes * 2 {
            return Ok(alloc);
        }

        let moved = self.alloc(bytes)?;
        // SAFETY: both allocations are live, distinct and at least this long.
        unsafe { move_contents(alloc, moved, capacity.min(bytes)) };
        release(alloc)?;
        self.free(alloc)?;
        Ok(moved)
    }

    fn free(&mut self, alloc: NonNull<GcAllocation>) -> Result<(), GcError> {
        let addr = alloc.as_ptr() as usize;
        if self.small.arena.window_contains(addr) {
            self.small.free(alloc)
        } else if self.large.window_contains(addr) {
            self.large.free(alloc)
        } else if self.huge.window_contains(addr) {
            self.huge.free(alloc)
        } else {
            Err(GcError::NotAllocated(addr))
        }
    }

    fn get_allocation_from_interior_pointer(&self, addr: usize) -> Option<NonNull<GcAllocation>> {
        self.small
            .lookup(addr)
            .or_else(|| self.large.lookup(addr))
            .or_else(|| self.huge.lookup(addr))
    }

    fn in_arena_bounds(&self, addr: usize) -> bool {
        self.small.arena.window_contains(addr)
            || self.large.window_contains(addr)
            || self.huge.window_contains(addr)
    }

    fn capacity_of(&self, alloc: NonNull<GcAllocation>) -> Option<usize> {
        self.small
            .capacity_of(alloc)
            .or_else(|| self.large.capacity_of(alloc))
            .or_else(|| self.huge.capacity_of(alloc))
    }

    fn free_unmarked(
        &mut self,
        reclaim: &mut dyn Reclaim,
        weakly_referenced: &mut Vec<NonNull<u8>>,
    ) -> Result<SweepStats, GcError> {
        let mut stats = SweepStats::default();
        self.small.sweep(reclaim, weakly_referenced, &mut stats)?;
        self.large.sweep(reclaim, weakly_referenced, &mut stats)?;
        self.huge.sweep(reclaim, weakly_referenced, &mut stats)?;
        Ok(stats)
    }

    fn prepare_for_collection(&mut self) -> Result<(), GcError> {
        Ok(())
    }

    fn cleanup_after_collection(&mut self) -> Result<(), GcError> {
        self.small.purge_retired()?;
        self.large.coalesce();
        self.huge.coalesce();
        self.huge.purge_dirty()
    }

    fn dump_statistics(&self) -> HeapStatistics {
        HeapStatistics {
            regions: vec![
                self.small.statistics(),
                self.large.statistics(),
                self.huge.statistics(),
            ],
        }
    }
}
