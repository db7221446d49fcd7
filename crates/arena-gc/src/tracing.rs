//! GC tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for collection cycles.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// Collection phases.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Root scan and graph traversal.
        Mark,
        /// Reclaim unreachable allocations.
        Sweep,
        /// Clear weak references and deliver callbacks.
        WeakRefs,
        /// Swap semispace roles.
        Flip,
    }

    /// Identifier correlating all events of one collection.
    ///
    /// Monotonically increasing from 1 across the process.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next GC ID.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Span covering a whole collection.
    pub fn trace_gc_collection(collection_type: &str, gc_id: GcId) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "gc_collect",
            collection_type = collection_type,
            gc_id = gc_id.0
        )
        .entered()
    }

    /// Span covering one phase.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log the start of a phase.
    pub fn log_phase_start(phase: GcPhase, collection: usize) {
        tracing::debug!(phase = ?phase, collection, "phase_start");
    }

    /// Log the end of a phase.
    pub fn log_phase_end(phase: GcPhase, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_end");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    /// Stub function when tracing is disabled.
    #[allow(dead_code)]
    pub fn next_gc_id() -> GcId {
        GcId(0)
    }
}

pub use internal::GcId;
