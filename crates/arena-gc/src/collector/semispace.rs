//! Semispace collection.
//!
//! A cycle swaps the roles of the two spaces. Survivors are not relocated and
//! fromspace garbage is not reclaimed; objects keep their addresses across
//! flips.

use super::{sealed, CollectionStrategy, CollectorPhase, GcCore};
use crate::config::{CollectorKind, GcConfig};
use crate::error::GcError;
use crate::heap::{Heap, SemiSpaceHeap};
use crate::metrics::{CollectionType, GcMetrics};

#[cfg(feature = "tracing")]
use crate::tracing::internal::{log_phase_end, log_phase_start, trace_phase, GcPhase};

/// The flip-only semispace strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemiSpace;

impl sealed::Sealed for SemiSpace {}

impl CollectionStrategy for SemiSpace {
    type Heap = SemiSpaceHeap;

    const KIND: CollectorKind = CollectorKind::SemiSpace;

    const NAME: &'static str = "semispace";

    fn new_heap(config: &GcConfig) -> Result<SemiSpaceHeap, GcError> {
        SemiSpaceHeap::new(config)
    }

    fn collect(core: &GcCore<SemiSpaceHeap>) -> Result<GcMetrics, GcError> {
        let collection = core.begin_collection()?;
        core.set_phase(CollectorPhase::Flipping);

        #[cfg(feature = "tracing")]
        let _span = trace_phase(GcPhase::Flip);
        #[cfg(feature = "tracing")]
        log_phase_start(GcPhase::Flip, collection);
        #[cfg(not(feature = "tracing"))]
        let _ = collection;

        {
            let mut heap = core.heap_mut()?;
            heap.prepare_for_collection()?;
            heap.flip();
            heap.cleanup_after_collection()?;
            #[cfg(feature = "tracing")]
            log_phase_end(GcPhase::Flip, heap.dump_statistics().total_live_objects());
        }

        core.leave_non_reentrant()?;
        core.weak().prune_abandoned();
        Ok(GcMetrics {
            collection_type: CollectionType::Flip,
            ..GcMetrics::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{GcBase, SemiSpaceCollector};
    use crate::header::GcKind;

    fn collector() -> SemiSpaceCollector {
        SemiSpaceCollector::new(
            GcConfig::new()
                .with_strategy(CollectorKind::SemiSpace)
                .with_arena_size(64 << 20)
                .with_commit_increment(1 << 20)
                .with_scan_native_stack(false),
        )
        .unwrap()
    }

    #[test]
    fn test_collection_flips_allocation_space() {
        let gc = collector();
        let before = gc.heap().tospace_start();
        let p = gc.gc_alloc(32, GcKind::Precise);
        gc.run_collection();
        assert_eq!(gc.collections(), 1);
        assert_eq!(gc.phase(), CollectorPhase::Idle);
        assert_ne!(gc.heap().tospace_start(), before);
        assert!(gc.is_valid_gc_memory(p.as_ptr()));

        let q = gc.gc_alloc(32, GcKind::Precise);
        assert!(q.as_ptr() as usize >= gc.heap().tospace_start());
        gc.run_collection();
        assert_eq!(gc.heap().tospace_start(), before);
        assert_eq!(gc.last_metrics().collection_type, CollectionType::Flip);
    }
}
