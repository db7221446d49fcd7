//! A stop-the-world tracing garbage collector core for managed-object
//! runtimes.
//!
//! The crate owns all heap memory for runtime objects. Allocations carry a
//! one-word [`GcAllocation`] header whose [`GcKind`] decides how the payload
//! is traced: conservatively, precisely, through the object model's
//! `visit_children` hook, or not at all.
//!
//! # Strategies
//!
//! - [`MarkSweepCollector`]: non-moving mark-sweep over small, large and huge
//!   arenas, with weak references and deferred weak callbacks.
//! - [`SemiSpaceCollector`]: two equally sized arenas whose collection cycle
//!   swaps their roles. Objects are never relocated.
//!
//! Both implement [`GcBase`]; the [`facade`] module keeps one active collector
//! per mutator thread and exposes the allocation entry points as free
//! functions.
//!
//! # Example
//!
//! ```
//! use arena_gc::{GcBase, GcConfig, GcKind, MarkSweepCollector};
//!
//! let gc = MarkSweepCollector::new(
//!     GcConfig::new()
//!         .with_arena_size(64 << 20)
//!         .with_scan_native_stack(false),
//! )
//! .unwrap();
//!
//! let kept = gc.gc_alloc(32, GcKind::Precise);
//! let dropped = gc.gc_alloc(32, GcKind::Untracked);
//! let root = gc.new_root_handle(Some(kept));
//!
//! gc.run_collection();
//! assert!(gc.is_valid_gc_memory(kept.as_ptr()));
//! assert!(!gc.is_valid_gc_memory(dropped.as_ptr()));
//! drop(root);
//! ```
//!
//! # Failure model
//!
//! Ordinary operation never reports errors. A broken invariant (reentrant
//! collection, a corrupt kind tag, a definite reference into the middle of an
//! object, an exhausted arena) ends in [`fatal`], which panics with the
//! matching [`GcError`].

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod arena;
mod collector;
mod config;
mod error;
pub mod facade;
mod header;
pub mod heap;
pub mod metrics;
pub mod object;
mod roots;
pub mod stack;
mod trace_stack;
mod tracing;
mod visitor;
mod weak;

pub use arena::Arena;
pub use collector::{
    new_collector, CollectionStrategy, Collector, CollectorPhase, GcBase, GcCore, MarkSweep,
    MarkSweepCollector, SemiSpace, SemiSpaceCollector,
};
pub use config::{
    CollectorKind, GcConfig, ALLOCBYTES_PER_COLLECTION, DEFAULT_ARENA_SIZE,
    DEFAULT_COMMIT_INCREMENT, DEFAULT_MAX_FREE_CHUNKS, DEFAULT_MAX_SCAN_RANGE,
    DEFAULT_TRACE_CHUNK_SIZE,
};
pub use error::{fatal, GcError};
pub use header::{scan_size_for, GcAllocation, GcKind, ALLOC_ALIGN, HEADER_SIZE, MAX_SCAN_SIZE};
pub use metrics::{global_metrics, last_gc_metrics, CollectionType, GcMetrics, GlobalMetrics};
pub use object::{AuxiliaryHeader, ClassObject, ObjectHeader, TypeOps};
pub use roots::{RootHandle, RootRegistry};
pub use stack::{NativeStackWalker, StackWalker};
pub use trace_stack::{free_chunk_count, TraceStack};
pub use tracing::GcId;
pub use visitor::GcVisitor;
pub use weak::{WeakCallback, WeakRef, WeakReference, WeakRegistry};
