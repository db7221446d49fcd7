//! Reserved, lazily committed address windows with bump allocation.
//!
//! Each heap region class owns one `Arena`. The whole window is reserved up
//! front so that "which region does this address belong to" is a pair of
//! comparisons; pages are committed only as the bump cursor reaches them.

use std::ptr::NonNull;

use sys_alloc::{Mmap, MmapOptions};

use crate::error::GcError;

/// A bump-allocated window of virtual memory.
pub struct Arena {
    reservation: Mmap,
    /// First usable address (aligned as requested).
    start: usize,
    /// Next address handed out.
    cursor: usize,
    /// End of the committed prefix.
    frontier: usize,
    /// End of the usable window.
    end: usize,
    /// Commit growth granularity (power of two).
    increment: usize,
}

impl Arena {
    /// Reserve `size` bytes whose start is aligned to `align` and commit
    /// `initial_commit` bytes of it.
    ///
    /// # Errors
    ///
    /// Fails if the OS denies the reservation or the initial commit.
    pub fn reserve(
        size: usize,
        align: usize,
        initial_commit: usize,
        increment: usize,
    ) -> Result<Self, GcError> {
        debug_assert!(align.is_power_of_two());
        debug_assert!(increment.is_power_of_two());
        let page = sys_alloc::page_size();
        let align = align.max(page);
        let len = size + align;

        // SAFETY: the mapping is reserve-only; nothing is touched before commit.
        let reservation = unsafe {
            MmapOptions::new()
                .len(len)
                .reserve_only(true)
                .no_reserve(true)
                .map_anon()
        }
        .map_err(|e| GcError::OsReserveFailed(len, e.to_string()))?;

        let base = reservation.ptr() as usize;
        let start = (base + align - 1) & !(align - 1);
        let mut arena = Self {
            reservation,
            start,
            cursor: start,
            frontier: start,
            end: start + size,
            increment,
        };

        if initial_commit > 0 {
            arena.extend_mapping(initial_commit)?;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            start = format_args!("{:#x}", arena.start),
            size,
            initial_commit,
            "arena_reserved"
        );

        Ok(arena)
    }

    /// Commit `size` more bytes past the frontier.
    ///
    /// # Errors
    ///
    /// [`GcError::ArenaExhausted`] if the window has no room,
    /// [`GcError::OsCommitFailed`] if the OS refuses.
    pub fn extend_mapping(&mut self, size: usize) -> Result<(), GcError> {
        debug_assert_eq!(size % sys_alloc::page_size(), 0);
        let remaining = self.end - self.frontier;
        if size > remaining {
            return Err(GcError::ArenaExhausted {
                requested: size,
                remaining,
            });
        }

        let offset = self.frontier - self.reservation.ptr() as usize;
        self.reservation
            .commit(offset, size)
            .map_err(|e| GcError::OsCommitFailed(size, e.to_string()))?;
        self.frontier += size;
        Ok(())
    }

    /// Bump the cursor by `size` bytes, committing more pages first if needed.
    ///
    /// Growth is rounded up to the commit increment.
    ///
    /// # Errors
    ///
    /// Propagates [`Arena::extend_mapping`] failures.
    pub fn alloc_from_arena(&mut self, size: usize) -> Result<NonNull<u8>, GcError> {
        if self.cursor + size > self.frontier {
            let grow_size = (size + self.increment - 1) & !(self.increment - 1);
            let remaining = self.end - self.frontier;
            // Near the end of the window, commit only what is left.
            let grow_size =
                if grow_size > remaining && size <= remaining + (self.frontier - self.cursor) {
                    remaining
                } else {
                    grow_size
                };
            self.extend_mapping(grow_size)?;
        }

        let rtn = self.cursor;
        self.cursor += size;
        // SAFETY: `start` is derived from a live mapping and never null.
        Ok(unsafe { NonNull::new_unchecked(rtn as *mut u8) })
    }

    /// Whether `addr` lies in the allocated prefix `[start, cursor)`.
    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: usize) -> bool {
        self.start <= addr && addr < self.cursor
    }

    /// Whether `addr` lies anywhere in the reserved window.
    #[inline]
    #[must_use]
    pub const fn window_contains(&self, addr: usize) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Release the physical pages behind `[addr, addr + len)`.
    ///
    /// The range stays committed and reads back as zero on unix.
    ///
    /// # Errors
    ///
    /// [`GcError::OsCommitFailed`] if the OS call fails.
    pub fn purge(&self, addr: usize, len: usize) -> Result<(), GcError> {
        debug_assert!(addr >= self.start && addr + len <= self.cursor);
        let offset = addr - self.reservation.ptr() as usize;
        self.reservation
            .purge(offset, len)
            .map_err(|e| GcError::OsCommitFailed(len, e.to_string()))
    }

    /// First address of the window.
    #[must_use]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Current bump cursor.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// End of the committed prefix.
    #[must_use]
    pub const fn frontier(&self) -> usize {
        self.frontier
    }

    /// End of the reserved window.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.end
    }

    /// Bytes handed out so far.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.cursor - self.start
    }

    /// Bytes committed so far.
    #[must_use]
    pub const fn committed(&self) -> usize {
        self.frontier - self.start
    }

    /// Commit growth granularity.
    #[must_use]
    pub const fn increment(&self) -> usize {
        self.increment
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("start", &format_args!("{:#x}", self.start))
            .field("cursor", &format_args!("{:#x}", self.cursor))
            .field("frontier", &format_args!("{:#x}", self.frontier))
            .field("end", &format_args!("{:#x}", self.end))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    #[test]
    fn test_bump_allocation_is_monotonic() {
        let mut arena = Arena::reserve(16 * MB, 4096, 0, 64 * 1024).unwrap();
        let a = arena.alloc_from_arena(24).unwrap().as_ptr() as usize;
        let b = arena.alloc_from_arena(40).unwrap().as_ptr() as usize;
        assert_eq!(a, arena.start());
        assert_eq!(b, a + 24);
        assert!(arena.contains(a));
        assert!(arena.contains(b + 39));
        assert!(!arena.contains(b + 40));
    }

    #[test]
    fn test_commit_grows_in_increments() {
        let increment = 64 * 1024;
        let mut arena = Arena::reserve(16 * MB, 4096, 0, increment).unwrap();
        assert_eq!(arena.committed(), 0);
        arena.alloc_from_arena(8).unwrap();
        assert_eq!(arena.committed(), increment);
        arena.alloc_from_arena(increment).unwrap();
        assert_eq!(arena.committed(), 2 * increment);
        assert!(arena.cursor() <= arena.frontier());
    }

    #[test]
    fn test_committed_memory_is_writable() {
        let mut arena = Arena::reserve(4 * MB, 4096, 0, 64 * 1024).unwrap();
        let p = arena.alloc_from_arena(4096).unwrap();
        unsafe {
            assert_eq!(*p.as_ptr(), 0);
            p.as_ptr().write_bytes(0x5a, 4096);
            assert_eq!(*p.as_ptr().add(4095), 0x5a);
        }
    }

    #[test]
    fn test_start_alignment() {
        let align = 256 * 1024;
        let arena = Arena::reserve(4 * MB, align, 0, 64 * 1024).unwrap();
        assert_eq!(arena.start() % align, 0);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut arena = Arena::reserve(128 * 1024, 4096, 0, 64 * 1024).unwrap();
        arena.alloc_from_arena(100 * 1024).unwrap();
        let err = arena.alloc_from_arena(64 * 1024).unwrap_err();
        assert!(matches!(err, GcError::ArenaExhausted { .. }));
    }

    #[test]
    fn test_tail_of_window_is_usable() {
        let mut arena = Arena::reserve(96 * 1024, 4096, 0, 64 * 1024).unwrap();
        arena.alloc_from_arena(64 * 1024).unwrap();
        // Rounded growth would overshoot the window; the remainder still serves the request.
        arena.alloc_from_arena(32 * 1024).unwrap();
        assert_eq!(arena.used(), 96 * 1024);
    }
}
