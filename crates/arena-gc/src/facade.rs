//! The allocation entry points the rest of the runtime calls.
//!
//! Each mutator thread has at most one active collector. It is installed
//! explicitly with [`install`] or [`install_collector`], or created with the
//! default configuration on first use, and torn down with [`shutdown`].
//!
//! ```
//! use arena_gc::{facade, GcConfig, GcKind};
//!
//! facade::install(
//!     GcConfig::new()
//!         .with_arena_size(64 << 20)
//!         .with_scan_native_stack(false),
//! )
//! .unwrap();
//!
//! let p = facade::gc_alloc(64, GcKind::Precise);
//! let handle = facade::new_root_handle(Some(p));
//! facade::run_collection();
//! assert!(facade::is_valid_gc_memory(p.as_ptr()));
//! drop(handle);
//! facade::shutdown();
//! ```

use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::collector::{new_collector, CollectorPhase, GcBase};
use crate::config::GcConfig;
use crate::error::{GcError, OrFatal};
use crate::header::GcKind;
use crate::heap::HeapStatistics;
use crate::metrics::GcMetrics;
use crate::roots::RootHandle;
use crate::stack::StackWalker;
use crate::weak::{WeakCallback, WeakRef};

thread_local! {
    static ACTIVE: RefCell<Option<Rc<dyn GcBase>>> = const { RefCell::new(None) };
}

/// Build and install a collector for this thread.
///
/// # Errors
///
/// A collector is already installed, or the collector cannot be built.
pub fn install(config: GcConfig) -> Result<(), GcError> {
    install_collector(new_collector(config)?)
}

/// Install an existing collector for this thread.
///
/// # Errors
///
/// A collector is already installed.
pub fn install_collector(collector: Rc<dyn GcBase>) -> Result<(), GcError> {
    ACTIVE.with(|active| {
        let mut active = active.borrow_mut();
        if active.is_some() {
            return Err(GcError::InvalidConfig("a collector is already installed"));
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(kind = ?collector.kind(), "collector installed");
        *active = Some(collector);
        Ok(())
    })
}

/// Whether this thread has an active collector.
#[must_use]
pub fn is_installed() -> bool {
    ACTIVE.with(|active| active.borrow().is_some())
}

/// The active collector, created with the default configuration if none is
/// installed.
#[must_use]
pub fn active() -> Rc<dyn GcBase> {
    ACTIVE.with(|active| {
        let mut active = active.borrow_mut();
        if let Some(collector) = active.as_ref() {
            return Rc::clone(collector);
        }
        let collector = new_collector(GcConfig::default()).or_fatal();
        *active = Some(Rc::clone(&collector));
        collector
    })
}

/// Clear the active collector's registries and uninstall it.
///
/// Its arenas are released once the last outstanding reference to it goes.
pub fn shutdown() {
    let collector = ACTIVE.with(|active| active.borrow_mut().take());
    if let Some(collector) = collector {
        collector.clear();
    }
}

/// See [`GcBase::gc_alloc`].
#[must_use]
pub fn gc_alloc(bytes: usize, kind: GcKind) -> NonNull<u8> {
    active().gc_alloc(bytes, kind)
}

/// See [`GcBase::gc_realloc`].
#[must_use]
pub fn gc_realloc(ptr: NonNull<u8>, bytes: usize) -> NonNull<u8> {
    active().gc_realloc(ptr, bytes)
}

/// See [`GcBase::gc_free`].
pub fn gc_free(ptr: NonNull<u8>) {
    active().gc_free(ptr);
}

/// See [`GcBase::run_collection`].
pub fn run_collection() {
    active().run_collection();
}

/// See [`GcBase::is_enabled`].
#[must_use]
pub fn is_enabled() -> bool {
    active().is_enabled()
}

/// See [`GcBase::enable`].
pub fn enable() {
    active().enable();
}

/// See [`GcBase::disable`].
pub fn disable() {
    active().disable();
}

/// See [`GcBase::register_gc_managed_bytes`].
pub fn register_gc_managed_bytes(bytes: usize) {
    active().register_gc_managed_bytes(bytes);
}

/// See [`GcBase::register_permanent_root`].
pub fn register_permanent_root(ptr: NonNull<u8>, allow_duplicates: bool) {
    active().register_permanent_root(ptr, allow_duplicates);
}

/// See [`GcBase::deregister_permanent_root`].
pub fn deregister_permanent_root(ptr: NonNull<u8>) {
    active().deregister_permanent_root(ptr);
}

/// See [`GcBase::register_nonheap_root`].
pub fn register_nonheap_root(ptr: NonNull<u8>, size: usize) {
    active().register_nonheap_root(ptr, size);
}

/// See [`GcBase::is_nonheap_root`].
#[must_use]
pub fn is_nonheap_root(ptr: *const u8) -> bool {
    active().is_nonheap_root(ptr)
}

/// See [`GcBase::register_potential_root_range`].
pub fn register_potential_root_range(start: *const u8, end: *const u8) {
    active().register_potential_root_range(start, end);
}

/// See [`GcBase::new_root_handle`].
#[must_use]
pub fn new_root_handle(ptr: Option<NonNull<u8>>) -> RootHandle {
    active().new_root_handle(ptr)
}

/// See [`GcBase::register_typed_object`].
pub fn register_typed_object(ptr: NonNull<u8>) {
    active().register_typed_object(ptr);
}

/// See [`GcBase::is_valid_gc_memory`].
#[must_use]
pub fn is_valid_gc_memory(ptr: *const u8) -> bool {
    active().is_valid_gc_memory(ptr)
}

/// See [`GcBase::is_valid_gc_object`].
#[must_use]
pub fn is_valid_gc_object(ptr: *const u8) -> bool {
    active().is_valid_gc_object(ptr)
}

/// See [`GcBase::make_weak_ref`].
#[must_use]
pub fn make_weak_ref(target: NonNull<u8>, callback: Option<WeakCallback>) -> WeakRef {
    active().make_weak_ref(target, callback)
}

/// See [`GcBase::start_unexpected_region`].
pub fn start_unexpected_region() {
    active().start_unexpected_region();
}

/// See [`GcBase::end_unexpected_region`].
pub fn end_unexpected_region() {
    active().end_unexpected_region();
}

/// See [`GcBase::set_stack_walker`].
pub fn set_stack_walker(walker: Option<Box<dyn StackWalker>>) {
    active().set_stack_walker(walker);
}

/// See [`GcBase::phase`].
#[must_use]
pub fn phase() -> CollectorPhase {
    active().phase()
}

/// See [`GcBase::collections`].
#[must_use]
pub fn collections() -> usize {
    active().collections()
}

/// See [`GcBase::last_metrics`].
#[must_use]
pub fn last_metrics() -> GcMetrics {
    active().last_metrics()
}

/// See [`GcBase::dump_statistics`].
#[must_use]
pub fn dump_statistics() -> HeapStatistics {
    active().dump_statistics()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorKind;

    fn small(kind: CollectorKind) -> GcConfig {
        GcConfig::new()
            .with_strategy(kind)
            .with_arena_size(64 << 20)
            .with_commit_increment(1 << 20)
            .with_scan_native_stack(false)
    }

    #[test]
    fn test_install_is_exclusive_until_shutdown() {
        install(small(CollectorKind::MarkSweep)).unwrap();
        assert!(is_installed());
        assert!(install(small(CollectorKind::MarkSweep)).is_err());
        shutdown();
        assert!(!is_installed());
        install(small(CollectorKind::SemiSpace)).unwrap();
        assert_eq!(active().kind(), CollectorKind::SemiSpace);
        shutdown();
    }

    #[test]
    fn test_shutdown_clears_roots() {
        install(small(CollectorKind::MarkSweep)).unwrap();
        let collector = active();
        let p = gc_alloc(16, GcKind::Untracked);
        register_permanent_root(p, false);
        assert!(collector.is_permanent_root(p));
        shutdown();
        assert!(!collector.is_permanent_root(p));
    }
}
