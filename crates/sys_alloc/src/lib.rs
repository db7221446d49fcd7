//! Virtual memory reservations for the collector's arenas.
//!
//! A [`Mmap`] owns one contiguous range of address space. It is created either
//! fully accessible or as a bare reservation whose pages become usable only
//! after [`Mmap::commit`]. Committed pages can later be handed back with
//! [`Mmap::purge`] without giving up the address range.

use std::io;
use std::ptr::NonNull;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

/// The system page size in bytes. Commit and purge ranges are multiples of it.
pub fn page_size() -> usize {
    os::page_size()
}

/// An owned range of address space, released on drop.
pub struct Mmap {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain memory with no thread affinity.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

impl Mmap {
    /// First byte of the range.
    pub fn ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Size of the range in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Make `[offset, offset + len)` readable and writable.
    ///
    /// Pages read as zero the first time they are touched. Committing pages
    /// that are already committed is allowed and leaves their contents alone.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the range is unaligned or leaves the mapping,
    /// otherwise the OS error.
    pub fn commit(&self, offset: usize, len: usize) -> io::Result<()> {
        let Some(addr) = self.subrange(offset, len)? else {
            return Ok(());
        };
        // SAFETY: `subrange` confined the range to this mapping.
        unsafe { os::commit(addr, len) }
    }

    /// Drop the physical pages behind `[offset, offset + len)`.
    ///
    /// The range stays committed. On unix it reads back as zero; on windows
    /// its contents are unspecified until written again.
    ///
    /// # Errors
    ///
    /// Same as [`Mmap::commit`].
    pub fn purge(&self, offset: usize, len: usize) -> io::Result<()> {
        let Some(addr) = self.subrange(offset, len)? else {
            return Ok(());
        };
        // SAFETY: `subrange` confined the range to this mapping.
        unsafe { os::purge(addr, len) }
    }

    /// Address of a validated, non-empty sub-range, or `None` when `len == 0`.
    fn subrange(&self, offset: usize, len: usize) -> io::Result<Option<*mut u8>> {
        let page = page_size();
        if offset % page != 0 || len % page != 0 {
            return Err(invalid("range is not page aligned"));
        }
        if offset.checked_add(len).map_or(true, |end| end > self.len) {
            return Err(invalid("range lies outside the mapping"));
        }
        if len == 0 {
            return Ok(None);
        }
        // SAFETY: `offset < self.len`, so the result stays inside the mapping.
        Ok(Some(unsafe { self.base.as_ptr().add(offset) }))
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        // SAFETY: `base..base + len` came from `os::map` and is released once.
        unsafe { os::unmap(self.base.as_ptr(), self.len) };
    }
}

/// Builder for anonymous mappings.
#[derive(Debug, Clone, Default)]
pub struct MmapOptions {
    len: usize,
    no_reserve: bool,
    reserve_only: bool,
}

impl MmapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the mapping in bytes. Must be non-zero.
    pub fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Skip swap accounting for the mapping (`MAP_NORESERVE` where supported).
    pub fn no_reserve(mut self, no_reserve: bool) -> Self {
        self.no_reserve = no_reserve;
        self
    }

    /// Take address space only. No page is accessible until committed.
    pub fn reserve_only(mut self, reserve_only: bool) -> Self {
        self.reserve_only = reserve_only;
        self
    }

    /// Create the mapping.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a zero length, otherwise the OS error.
    ///
    /// # Safety
    ///
    /// Pointers derived from [`Mmap::ptr`] must not outlive the `Mmap`, and
    /// pages of a reserve-only mapping must be committed before use.
    pub unsafe fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(invalid("mapping length is zero"));
        }
        let base = unsafe { os::map(self.len, self.no_reserve, self.reserve_only)? };
        let base = NonNull::new(base).ok_or_else(|| invalid("os returned a null mapping"))?;
        Ok(Mmap {
            base,
            len: self.len,
        })
    }
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(pages: usize) -> Mmap {
        unsafe {
            MmapOptions::new()
                .len(pages * page_size())
                .reserve_only(true)
                .no_reserve(true)
                .map_anon()
        }
        .unwrap()
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
        assert!(page_size() >= 4096);
    }

    #[test]
    fn test_zero_length_is_rejected() {
        let err = unsafe { MmapOptions::new().map_anon() }.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_accessible_mapping_starts_zeroed() {
        let len = 2 * page_size();
        let map = unsafe { MmapOptions::new().len(len).map_anon() }.unwrap();
        assert_eq!(map.len(), len);
        assert_eq!(map.ptr() as usize % page_size(), 0);
        let bytes = unsafe { std::slice::from_raw_parts_mut(map.ptr(), len) };
        assert!(bytes.iter().all(|b| *b == 0));
        bytes[len - 1] = 7;
        assert_eq!(bytes[len - 1], 7);
    }

    #[test]
    fn test_commit_in_steps() {
        let page = page_size();
        let map = reservation(8);
        for step in 0..4 {
            map.commit(step * 2 * page, 2 * page).unwrap();
            let p = unsafe { map.ptr().add(step * 2 * page) };
            unsafe {
                assert_eq!(*p, 0);
                p.write(step as u8 + 1);
            }
        }
        // Recommitting keeps what was written.
        map.commit(0, 8 * page).unwrap();
        assert_eq!(unsafe { *map.ptr().add(6 * page) }, 4);
    }

    #[test]
    fn test_ranges_are_checked() {
        let page = page_size();
        let map = reservation(4);
        let kind = |r: io::Result<()>| r.unwrap_err().kind();
        assert_eq!(kind(map.commit(1, page)), io::ErrorKind::InvalidInput);
        assert_eq!(kind(map.commit(0, page + 1)), io::ErrorKind::InvalidInput);
        assert_eq!(kind(map.commit(4 * page, page)), io::ErrorKind::InvalidInput);
        assert_eq!(kind(map.purge(usize::MAX - page + 1, page)), io::ErrorKind::InvalidInput);
        map.commit(4 * page, 0).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_purged_pages_read_back_zero() {
        let page = page_size();
        let map = reservation(2);
        map.commit(0, 2 * page).unwrap();
        unsafe {
            map.ptr().write_bytes(0xAB, 2 * page);
        }
        map.purge(page, page).unwrap();
        unsafe {
            assert_eq!(*map.ptr(), 0xAB);
            assert_eq!(*map.ptr().add(page), 0);
            map.ptr().add(page).write(1);
        }
    }
}
