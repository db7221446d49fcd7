//! The word-sized header in front of every managed allocation.
//!
//! ```text
//!  0        1        2                 4                                8
//! +--------+--------+-----------------+---------------------------------+-----------
//! | flags  |  kind  |    reserved     |            scan_size            | payload...
//! +--------+--------+-----------------+---------------------------------+-----------
//!                                                                      ^ user pointer
//! ```
//!
//! The header sits at a fixed negative offset from the user pointer, so both
//! directions of the conversion are pointer arithmetic.

use std::cell::Cell;
use std::mem::{offset_of, size_of};
use std::ptr::NonNull;

use crate::error::GcError;

/// How an allocation's payload is traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GcKind {
    /// A runtime object whose type descriptor supplies `visit_children`.
    Typed = 1,
    /// `scan_size` bytes of maybe-pointers, each checked against the heap.
    Conservative = 2,
    /// `scan_size` bytes of definite pointers (or null).
    Precise = 3,
    /// Opaque bytes, never scanned.
    Untracked = 4,
    /// Self-describing runtime metadata with its own visit hook.
    Auxiliary = 5,
    /// Conservative allocation later registered as a runtime object.
    ConservativeTyped = 6,
}

impl GcKind {
    /// Decode a raw tag.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Typed),
            2 => Some(Self::Conservative),
            3 => Some(Self::Precise),
            4 => Some(Self::Untracked),
            5 => Some(Self::Auxiliary),
            6 => Some(Self::ConservativeTyped),
            _ => None,
        }
    }

    /// Whether `scan_size` is meaningful for this kind.
    #[must_use]
    pub const fn uses_scan_size(self) -> bool {
        matches!(self, Self::Conservative | Self::ConservativeTyped | Self::Precise)
    }

    /// Whether allocations of this kind are runtime objects (finalizers, weak references).
    #[must_use]
    pub const fn is_object(self) -> bool {
        matches!(self, Self::Typed | Self::ConservativeTyped)
    }
}

/// Collector-private flag bits.
pub mod flags {
    /// Reached during the current mark phase.
    pub const MARKED: u8 = 1 << 0;
}

/// Metadata prefixed to every managed allocation.
#[repr(C)]
pub struct GcAllocation {
    gc_flags: Cell<u8>,
    kind_id: Cell<u8>,
    _reserved: u16,
    scan_size: Cell<u32>,
}

const _: () = assert!(size_of::<GcAllocation>() <= size_of::<u64>());

/// Distance from the header to the user pointer.
pub const HEADER_SIZE: usize = size_of::<GcAllocation>();

/// Alignment of every user pointer.
pub const ALLOC_ALIGN: usize = 8;

impl GcAllocation {
    /// Header for a user pointer.
    #[inline]
    #[must_use]
    pub const fn from_user_data(user_data: NonNull<u8>) -> NonNull<Self> {
        // SAFETY: every user pointer is HEADER_SIZE bytes past its header.
        unsafe { user_data.sub(HEADER_SIZE).cast() }
    }

    /// User pointer for a header.
    #[inline]
    #[must_use]
    pub const fn user_data(this: NonNull<Self>) -> NonNull<u8> {
        // SAFETY: the payload immediately follows the header.
        unsafe { this.cast::<u8>().add(HEADER_SIZE) }
    }

    /// Write a fresh header at `at`.
    ///
    /// # Safety
    ///
    /// `at` must be valid for `HEADER_SIZE` writable bytes and 8-aligned.
    pub unsafe fn init(at: NonNull<Self>, kind: GcKind, scan_size: u32) {
        unsafe {
            at.as_ptr().write(Self {
                gc_flags: Cell::new(0),
                kind_id: Cell::new(kind as u8),
                _reserved: 0,
                scan_size: Cell::new(scan_size),
            });
        }
    }

    /// Raw kind byte.
    #[inline]
    #[must_use]
    pub fn kind_raw(&self) -> u8 {
        self.kind_id.get()
    }

    /// Decoded kind, or `None` for a corrupt tag.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<GcKind> {
        GcKind::from_u8(self.kind_id.get())
    }

    /// Irreversibly turn a conservative allocation into a conservative runtime object.
    ///
    /// Returns `false` if the allocation was not conservative.
    pub fn promote_to_conservative_typed(&self) -> bool {
        if self.kind() == Some(GcKind::Conservative) {
            self.kind_id.set(GcKind::ConservativeTyped as u8);
            true
        } else {
            false
        }
    }

    /// Number of leading payload bytes to scan.
    #[inline]
    #[must_use]
    pub fn scan_size(&self) -> usize {
        self.scan_size.get() as usize
    }

    /// Update the scan size after a resize.
    pub fn set_scan_size(&self, bytes: u32) {
        self.scan_size.set(bytes);
    }

    /// Mark bit.
    #[inline]
    #[must_use]
    pub fn is_marked(&self) -> bool {
        self.gc_flags.get() & flags::MARKED != 0
    }

    /// Set the mark bit.
    #[inline]
    pub fn set_mark(&self) {
        self.gc_flags.set(self.gc_flags.get() | flags::MARKED);
    }

    /// Clear the mark bit.
    #[inline]
    pub fn clear_mark(&self) {
        self.gc_flags.set(self.gc_flags.get() & !flags::MARKED);
    }
}

/// Exclusive upper bound of a scan size.
pub const MAX_SCAN_SIZE: usize = 1 << 31;

/// Round `bytes` up to a whole number of pointers.
///
/// # Errors
///
/// [`GcError::AllocationTooLarge`] if the result does not fit the 31-bit scan
/// size field.
pub fn scan_size_for(bytes: usize) -> Result<u32, GcError> {
    let word = size_of::<usize>();
    bytes
        .checked_add(word - 1)
        .map(|n| n & !(word - 1))
        .filter(|rounded| *rounded < MAX_SCAN_SIZE)
        .and_then(|rounded| u32::try_from(rounded).ok())
        .ok_or(GcError::AllocationTooLarge(bytes))
}

const _: () = assert!(offset_of!(GcAllocation, scan_size) == 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_word_sized() {
        assert_eq!(HEADER_SIZE, 8);
    }

    #[test]
    fn test_header_user_data_round_trip() {
        let mut storage = [0u64; 4];
        let base = NonNull::new(storage.as_mut_ptr().cast::<GcAllocation>()).unwrap();
        unsafe { GcAllocation::init(base, GcKind::Precise, 16) };
        let user = GcAllocation::user_data(base);
        assert_eq!(user.as_ptr() as usize - base.as_ptr() as usize, HEADER_SIZE);
        assert_eq!(GcAllocation::from_user_data(user), base);

        let header = unsafe { base.as_ref() };
        assert_eq!(header.kind(), Some(GcKind::Precise));
        assert_eq!(header.scan_size(), 16);
    }

    #[test]
    fn test_mark_bits() {
        let mut storage = [0u64; 1];
        let base = NonNull::new(storage.as_mut_ptr().cast::<GcAllocation>()).unwrap();
        unsafe { GcAllocation::init(base, GcKind::Untracked, 0) };
        let header = unsafe { base.as_ref() };
        assert!(!header.is_marked());
        header.set_mark();
        assert!(header.is_marked());
        header.clear_mark();
        assert!(!header.is_marked());
    }

    #[test]
    fn test_promotion_is_one_way() {
        let mut storage = [0u64; 1];
        let base = NonNull::new(storage.as_mut_ptr().cast::<GcAllocation>()).unwrap();
        unsafe { GcAllocation::init(base, GcKind::Conservative, 8) };
        let header = unsafe { base.as_ref() };
        assert!(header.promote_to_conservative_typed());
        assert_eq!(header.kind(), Some(GcKind::ConservativeTyped));
        assert!(!header.promote_to_conservative_typed());
        assert_eq!(header.kind(), Some(GcKind::ConservativeTyped));
    }

    #[test]
    fn test_unknown_kind_decodes_to_none() {
        assert_eq!(GcKind::from_u8(0), None);
        assert_eq!(GcKind::from_u8(200), None);
        assert_eq!(GcKind::from_u8(6), Some(GcKind::ConservativeTyped));
    }

    #[test]
    fn test_scan_size_rounds_to_words() {
        assert_eq!(scan_size_for(0), Ok(0));
        assert_eq!(scan_size_for(1), Ok(size_of::<usize>() as u32));
        assert_eq!(scan_size_for(17), Ok(24));
        assert_eq!(
            scan_size_for(MAX_SCAN_SIZE),
            Err(GcError::AllocationTooLarge(MAX_SCAN_SIZE))
        );
        assert_eq!(
            scan_size_for(usize::MAX),
            Err(GcError::AllocationTooLarge(usize::MAX))
        );
    }
}
