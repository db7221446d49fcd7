//! Mark-sweep collection.
//!
//! One cycle runs, in order: root scan and graph traversal, the dead-class
//! retention pass, sweep, weak reference clearing (still non-reentrant), and
//! finally weak callback delivery, which may allocate or even collect again.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::rc::Rc;

use super::{sealed, traverse, CollectionStrategy, CollectorPhase, GcCore};
use crate::config::{CollectorKind, GcConfig};
use crate::error::GcError;
use crate::header::GcAllocation;
use crate::heap::{Heap, MarkSweepHeap, SweepStats};
use crate::metrics::{CollectionType, GcMetrics, PhaseTimer};
use crate::visitor::GcVisitor;
use crate::weak::WeakReference;

#[cfg(feature = "tracing")]
use crate::tracing::internal::{log_phase_end, log_phase_start, trace_phase, GcPhase};

/// The non-moving mark-sweep strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkSweep;

impl sealed::Sealed for MarkSweep {}

impl CollectionStrategy for MarkSweep {
    type Heap = MarkSweepHeap;

    const KIND: CollectorKind = CollectorKind::MarkSweep;

    const NAME: &'static str = "mark_sweep";

    fn new_heap(config: &GcConfig) -> Result<MarkSweepHeap, GcError> {
        MarkSweepHeap::new(config)
    }

    fn collect(core: &GcCore<MarkSweepHeap>) -> Result<GcMetrics, GcError> {
        let collection = core.begin_collection()?;
        let mut timer = PhaseTimer::new();

        core.heap_mut()?.prepare_for_collection()?;

        timer.start();
        core.set_phase(CollectorPhase::Marking);
        let objects_marked = mark_phase(core, collection)?;
        timer.end_mark();

        // Weakly referenced objects survive the sweep so their weak lists can
        // be read once every other object (weak records included) is gone.
        timer.start();
        core.set_phase(CollectorPhase::Sweeping);
        let mut weakly_referenced = Vec::new();
        let stats = sweep_phase(core, collection, &mut weakly_referenced)?;
        timer.end_sweep();

        timer.start();
        let cleared = clear_weak_refs(core, &weakly_referenced)?;
        core.leave_non_reentrant()?;
        timer.end_weak();

        // Callbacks run outside the non-reentrant section: they may allocate
        // and may start another collection.
        timer.start();
        core.set_phase(CollectorPhase::WeakCallbackDelivery);
        let weak_callbacks_run = deliver_callbacks(cleared.pending);
        core.weak().prune_abandoned();
        timer.end_weak();

        core.heap_mut()?.cleanup_after_collection()?;

        Ok(GcMetrics {
            mark_duration: timer.mark,
            sweep_duration: timer.sweep,
            weak_duration: timer.weak,
            objects_marked,
            objects_freed: stats.objects_freed + cleared.objects_freed,
            bytes_freed: stats.bytes_freed + cleared.bytes_freed,
            objects_surviving: stats.objects_surviving - cleared.objects_freed,
            weak_refs_cleared: cleared.records,
            weak_callbacks_run,
            collection_type: CollectionType::MarkSweep,
            ..GcMetrics::new()
        })
    }
}

fn mark_phase(core: &GcCore<MarkSweepHeap>, collection: usize) -> Result<usize, GcError> {
    #[cfg(feature = "tracing")]
    let _span = trace_phase(GcPhase::Mark);
    #[cfg(feature = "tracing")]
    log_phase_start(GcPhase::Mark, collection);
    #[cfg(not(feature = "tracing"))]
    let _ = collection;

    let heap = core.heap()?;
    let mut visitor = GcVisitor::new(&*heap, core.roots(), core.config());
    core.mark_roots(&mut visitor)?;
    let mut marked = traverse(&mut visitor)?;
    marked += core.retain_dead_classes(&mut visitor)?;

    #[cfg(feature = "tracing")]
    log_phase_end(GcPhase::Mark, marked);
    Ok(marked)
}

fn sweep_phase(
    core: &GcCore<MarkSweepHeap>,
    collection: usize,
    weakly_referenced: &mut Vec<NonNull<u8>>,
) -> Result<SweepStats, GcError> {
    #[cfg(feature = "tracing")]
    let _span = trace_phase(GcPhase::Sweep);
    #[cfg(feature = "tracing")]
    log_phase_start(GcPhase::Sweep, collection);
    #[cfg(not(feature = "tracing"))]
    let _ = collection;

    let mut heap = core.heap_mut()?;
    let mut reclaim = |alloc: NonNull<GcAllocation>| core.finalize(alloc, true);
    let stats = heap.free_unmarked(&mut reclaim, weakly_referenced)?;

    #[cfg(feature = "tracing")]
    log_phase_end(GcPhase::Sweep, stats.objects_freed);
    Ok(stats)
}

#[derive(Debug, Default)]
struct ClearedWeakRefs {
    pending: VecDeque<Rc<WeakReference>>,
    records: usize,
    objects_freed: usize,
    bytes_freed: usize,
}

/// Clear every weak record of each deferred object, queue the callbacks
/// still owned by the mutator, then free the object.
fn clear_weak_refs(
    core: &GcCore<MarkSweepHeap>,
    weakly_referenced: &[NonNull<u8>],
) -> Result<ClearedWeakRefs, GcError> {
    #[cfg(feature = "tracing")]
    let _span = trace_phase(GcPhase::WeakRefs);

    let mut cleared = ClearedWeakRefs::default();
    let mut heap = core.heap_mut()?;
    for &obj in weakly_referenced {
        for record in core.weak().take(obj.as_ptr() as usize) {
            if record.target().is_none() {
                continue;
            }
            record.clear();
            cleared.records += 1;
            if record.has_callback() && Rc::strong_count(&record) > 1 {
                cleared.pending.push_back(record);
            }
        }

        let alloc = GcAllocation::from_user_data(obj);
        cleared.bytes_freed += heap.capacity_of(alloc).unwrap_or(0);
        core.release(&mut heap, obj)?;
        cleared.objects_freed += 1;
    }

    #[cfg(feature = "tracing")]
    log_phase_end(GcPhase::WeakRefs, cleared.records);
    Ok(cleared)
}

fn deliver_callbacks(pending: VecDeque<Rc<WeakReference>>) -> usize {
    let mut delivered = 0;
    for record in pending {
        if record.deliver() {
            delivered += 1;
        }
    }
    delivered
}
