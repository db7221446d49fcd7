//! Fatal collector conditions.
//!
//! Nothing in this crate reports ordinary allocation or collection failures to
//! the caller: every `GcError` means an address-space or object-graph invariant
//! has already been broken. Internals propagate these with `?` and the public
//! entry points hand them to [`fatal`].

use thiserror::Error;

use crate::header::GcKind;

/// A violated collector invariant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GcError {
    /// A collection (or an allocation) was requested from inside the
    /// non-reentrant section of a running collection.
    #[error("reentrant collection: the collector is already inside its non-reentrant section")]
    Reentrancy,

    /// `end_unexpected_region` was called without a matching start.
    #[error("non-reentrant section ended while not inside one")]
    UnbalancedRegion,

    /// An allocation header carries a kind tag outside the known set.
    #[error("unrecognized gc kind tag {0} at {1:#x}")]
    UnknownKind(u8, usize),

    /// A precise reference does not point at the start of an allocation's payload.
    #[error("definite reference {0:#x} does not match the start of an allocation")]
    MisalignedReference(usize),

    /// A precise reference lies outside every arena and is not a registered non-heap root.
    #[error("reference {0:#x} is outside the heap and not a registered non-heap root")]
    ForeignReference(usize),

    /// A scan range is implausibly large.
    #[error("asked to scan {0} bytes in one range; refusing")]
    RangeTooLarge(usize),

    /// A scanned allocation is too large for the header's scan size field.
    #[error("allocation of {0} bytes is too large to scan")]
    AllocationTooLarge(usize),

    /// The reserved window of an arena is used up.
    #[error("arena exhausted: {requested} bytes requested with {remaining} bytes left in the reservation")]
    ArenaExhausted {
        /// Bytes the caller asked for.
        requested: usize,
        /// Bytes left between the committed frontier and the end of the window.
        remaining: usize,
    },

    /// The OS refused to reserve an arena window.
    #[error("failed to reserve {0} bytes of address space: {1}")]
    OsReserveFailed(usize, String),

    /// The OS refused to commit pages inside an arena window.
    #[error("failed to allocate memory from OS: commit of {0} bytes failed: {1}")]
    OsCommitFailed(usize, String),

    /// A root registration broke the registry's invariants.
    #[error("invalid root registration for {addr:#x}: {reason}")]
    InvalidRootRegistration {
        /// The offending address.
        addr: usize,
        /// What went wrong.
        reason: &'static str,
    },

    /// An operation that needs a live allocation got something else.
    #[error("{0:#x} is not a live allocation of this heap")]
    NotAllocated(usize),

    /// `register_typed_object` was handed an allocation of a kind that cannot hold an object.
    #[error("cannot register {addr:#x} as a typed object: its kind is {kind:?}")]
    NotAnObject {
        /// The allocation's address.
        addr: usize,
        /// Its kind at registration time.
        kind: GcKind,
    },

    /// An object was registered before its class pointer was set.
    #[error("object {0:#x} registered with a null class")]
    UnclassedObject(usize),

    /// An object was released explicitly while weak references still target it.
    #[error("{0:#x} was freed while still weakly referenced")]
    FreeWhileWeaklyReferenced(usize),

    /// A weak reference was requested to something that cannot carry one.
    #[error("{0:#x} does not support weak references")]
    WeakRefsUnsupported(usize),

    /// The configuration is unusable.
    #[error("invalid gc configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Stop on a broken invariant.
///
/// Unwinds with the error's message so the failure is loud and, in tests,
/// observable through `#[should_panic]`.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(err: GcError) -> ! {
    #[cfg(feature = "tracing")]
    tracing::error!(error = %err, "fatal gc error");
    panic!("{err}")
}

/// Unwrap a collector-internal result, treating any error as fatal.
pub(crate) trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for Result<T, GcError> {
    #[inline]
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => fatal(e),
        }
    }
}
