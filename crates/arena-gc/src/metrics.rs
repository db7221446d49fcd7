//! GC metrics and statistics.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Statistics from the most recent garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcMetrics {
    /// Duration of the whole collection.
    pub duration: Duration,
    /// Duration of root scanning and graph traversal.
    pub mark_duration: Duration,
    /// Duration of the sweep.
    pub sweep_duration: Duration,
    /// Duration of weak reference clearing and callback delivery.
    pub weak_duration: Duration,
    /// Allocations reached during marking.
    pub objects_marked: usize,
    /// Allocations released, deferred ones included.
    pub objects_freed: usize,
    /// Bytes released, headers included.
    pub bytes_freed: usize,
    /// Allocations that survived the sweep.
    pub objects_surviving: usize,
    /// Weak reference records cleared.
    pub weak_refs_cleared: usize,
    /// Weak reference callbacks delivered.
    pub weak_callbacks_run: usize,
    /// What kind of cycle ran.
    pub collection_type: CollectionType,
    /// Collections this collector has run, this one included.
    pub total_collections: usize,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// All fields zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            mark_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            weak_duration: Duration::ZERO,
            objects_marked: 0,
            objects_freed: 0,
            bytes_freed: 0,
            objects_surviving: 0,
            weak_refs_cleared: 0,
            weak_callbacks_run: 0,
            collection_type: CollectionType::None,
            total_collections: 0,
        }
    }
}

/// Type of GC collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionType {
    /// No collection has run yet.
    #[default]
    None = 0,
    /// Mark, sweep and weak reference resolution.
    MarkSweep = 1,
    /// Semispace role swap.
    Flip = 2,
}

/// Captures phase durations for one collection.
///
/// ```
/// use arena_gc::metrics::PhaseTimer;
///
/// let mut timer = PhaseTimer::new();
/// timer.start();
/// // ... mark ...
/// timer.end_mark();
/// timer.start();
/// // ... sweep ...
/// timer.end_sweep();
/// assert!(timer.total() >= timer.mark);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimer {
    /// Mark phase time.
    pub mark: Duration,
    /// Sweep phase time.
    pub sweep: Duration,
    /// Weak reference phase time.
    pub weak: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    /// All durations zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mark: Duration::ZERO,
            sweep: Duration::ZERO,
            weak: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the mark phase.
    pub fn end_mark(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.mark = start.elapsed();
        }
    }

    /// End the sweep phase.
    pub fn end_sweep(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.sweep = start.elapsed();
        }
    }

    /// End the weak reference phase. Accumulates, since the phase is split
    /// around the non-reentrant section.
    pub fn end_weak(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.weak += start.elapsed();
        }
    }

    /// Sum of the recorded phases.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.mark + self.sweep + self.weak
    }
}

/// Process-level cumulative GC statistics.
///
/// ```
/// use arena_gc::global_metrics;
///
/// let metrics = global_metrics();
/// let _ = metrics.total_collections();
/// let _ = metrics.total_bytes_freed();
/// ```
#[derive(Debug)]
pub struct GlobalMetrics {
    collections: AtomicUsize,
    mark_sweep_collections: AtomicUsize,
    flips: AtomicUsize,
    bytes_freed: AtomicUsize,
    objects_freed: AtomicUsize,
    weak_callbacks_run: AtomicUsize,
    pause_ns: AtomicU64,
    last: Mutex<GcMetrics>,
}

impl Default for GlobalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMetrics {
    /// All counters zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            collections: AtomicUsize::new(0),
            mark_sweep_collections: AtomicUsize::new(0),
            flips: AtomicUsize::new(0),
            bytes_freed: AtomicUsize::new(0),
            objects_freed: AtomicUsize::new(0),
            weak_callbacks_run: AtomicUsize::new(0),
            pause_ns: AtomicU64::new(0),
            last: parking_lot::const_mutex(GcMetrics::new()),
        }
    }

    /// Collections of any kind.
    #[inline]
    #[must_use]
    pub fn total_collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    /// Mark-sweep collections.
    #[inline]
    #[must_use]
    pub fn total_mark_sweep_collections(&self) -> usize {
        self.mark_sweep_collections.load(Ordering::Relaxed)
    }

    /// Semispace flips.
    #[inline]
    #[must_use]
    pub fn total_flips(&self) -> usize {
        self.flips.load(Ordering::Relaxed)
    }

    /// Bytes released by sweeps.
    #[inline]
    #[must_use]
    pub fn total_bytes_freed(&self) -> usize {
        self.bytes_freed.load(Ordering::Relaxed)
    }

    /// Allocations released by sweeps.
    #[inline]
    #[must_use]
    pub fn total_objects_freed(&self) -> usize {
        self.objects_freed.load(Ordering::Relaxed)
    }

    /// Weak reference callbacks delivered.
    #[inline]
    #[must_use]
    pub fn total_weak_callbacks_run(&self) -> usize {
        self.weak_callbacks_run.load(Ordering::Relaxed)
    }

    /// Time spent inside collections.
    #[inline]
    #[must_use]
    pub fn total_pause_time(&self) -> Duration {
        Duration::from_nanos(self.pause_ns.load(Ordering::Relaxed))
    }

    /// Metrics of the most recent collection on any thread.
    #[must_use]
    pub fn last_collection(&self) -> GcMetrics {
        *self.last.lock()
    }

    fn record(&self, metrics: &GcMetrics) {
        *self.last.lock() = *metrics;
        self.collections.fetch_add(1, Ordering::Relaxed);
        match metrics.collection_type {
            CollectionType::MarkSweep => {
                self.mark_sweep_collections.fetch_add(1, Ordering::Relaxed);
            }
            CollectionType::Flip => {
                self.flips.fetch_add(1, Ordering::Relaxed);
            }
            CollectionType::None => {}
        }
        self.bytes_freed
            .fetch_add(metrics.bytes_freed, Ordering::Relaxed);
        self.objects_freed
            .fetch_add(metrics.objects_freed, Ordering::Relaxed);
        self.weak_callbacks_run
            .fetch_add(metrics.weak_callbacks_run, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        let nanos = metrics.duration.as_nanos() as u64;
        self.pause_ns.fetch_add(nanos, Ordering::Relaxed);
    }
}

static GLOBAL_METRICS: GlobalMetrics = GlobalMetrics::new();

/// Process-wide cumulative statistics.
#[must_use]
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}

thread_local! {
    static LAST_METRICS: Cell<GcMetrics> = const { Cell::new(GcMetrics::new()) };
}

/// Metrics of the last collection run on this thread, by any collector.
#[must_use]
pub fn last_gc_metrics() -> GcMetrics {
    LAST_METRICS.with(Cell::get)
}

pub(crate) fn record_metrics(metrics: &GcMetrics) {
    LAST_METRICS.with(|m| m.set(*metrics));
    GLOBAL_METRICS.record(metrics);
}
