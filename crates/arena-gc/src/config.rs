//! Collector configuration.

use crate::error::GcError;

/// Bytes of allocation between threshold-triggered collections.
pub const ALLOCBYTES_PER_COLLECTION: usize = 10_000_000;

/// Default reserved window for each arena (64 GiB of address space).
#[cfg(target_pointer_width = "64")]
pub const DEFAULT_ARENA_SIZE: usize = 0x10_0000_0000;
/// Default reserved window for each arena.
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_ARENA_SIZE: usize = 0x1000_0000;

/// Default growth step when an arena runs past its committed frontier.
pub const DEFAULT_COMMIT_INCREMENT: usize = 16 * 1024 * 1024;

/// Words per trace stack chunk.
pub const DEFAULT_TRACE_CHUNK_SIZE: usize = 256;

/// Chunks retained in the process-wide free pool.
pub const DEFAULT_MAX_FREE_CHUNKS: usize = 50;

/// Largest range `visit_range` / `visit_potential_range` accept.
pub const DEFAULT_MAX_SCAN_RANGE: usize = 1_000_000_000;

/// Which collection algorithm a collector runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollectorKind {
    /// Non-moving mark-sweep over small/large/huge arenas.
    #[default]
    MarkSweep,
    /// Two-space strategy whose cycle is an arena flip.
    SemiSpace,
}

/// Settings for a collector instance.
///
/// ```
/// use arena_gc::{CollectorKind, GcConfig};
///
/// let config = GcConfig::new()
///     .with_strategy(CollectorKind::MarkSweep)
///     .with_alloc_bytes_per_collection(1 << 20)
///     .with_arena_size(256 << 20)
///     .with_scan_native_stack(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Collection algorithm.
    pub strategy: CollectorKind,
    /// Allocation volume that trips a collection while enabled.
    pub alloc_bytes_per_collection: usize,
    /// Reserved address window per arena.
    pub arena_size: usize,
    /// Bytes committed up front in each arena.
    pub initial_commit: usize,
    /// Commit growth granularity.
    pub commit_increment: usize,
    /// Words per trace stack chunk.
    pub trace_chunk_size: usize,
    /// Chunks kept in the free pool between collections.
    pub max_free_chunks: usize,
    /// Upper bound for a single scanned range.
    pub max_scan_range_bytes: usize,
    /// Run the built-in conservative stack walker during root marking.
    pub scan_native_stack: bool,
}

impl GcConfig {
    /// Default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            strategy: CollectorKind::MarkSweep,
            alloc_bytes_per_collection: ALLOCBYTES_PER_COLLECTION,
            arena_size: DEFAULT_ARENA_SIZE,
            initial_commit: 0,
            commit_increment: DEFAULT_COMMIT_INCREMENT,
            trace_chunk_size: DEFAULT_TRACE_CHUNK_SIZE,
            max_free_chunks: DEFAULT_MAX_FREE_CHUNKS,
            max_scan_range_bytes: DEFAULT_MAX_SCAN_RANGE,
            scan_native_stack: true,
        }
    }

    /// Sets the collection algorithm.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: CollectorKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the allocation threshold.
    #[must_use]
    pub const fn with_alloc_bytes_per_collection(mut self, bytes: usize) -> Self {
        self.alloc_bytes_per_collection = bytes;
        self
    }

    /// Sets the reserved window per arena.
    #[must_use]
    pub const fn with_arena_size(mut self, bytes: usize) -> Self {
        self.arena_size = bytes;
        self
    }

    /// Sets how much of each arena is committed at creation.
    #[must_use]
    pub const fn with_initial_commit(mut self, bytes: usize) -> Self {
        self.initial_commit = bytes;
        self
    }

    /// Sets the commit growth step.
    #[must_use]
    pub const fn with_commit_increment(mut self, bytes: usize) -> Self {
        self.commit_increment = bytes;
        self
    }

    /// Sets the trace stack chunk size in words.
    #[must_use]
    pub const fn with_trace_chunk_size(mut self, words: usize) -> Self {
        self.trace_chunk_size = words;
        self
    }

    /// Sets the free chunk pool capacity.
    #[must_use]
    pub const fn with_max_free_chunks(mut self, chunks: usize) -> Self {
        self.max_free_chunks = chunks;
        self
    }

    /// Enables or disables the built-in native stack walker.
    #[must_use]
    pub const fn with_scan_native_stack(mut self, scan: bool) -> Self {
        self.scan_native_stack = scan;
        self
    }

    /// Check that sizes are usable.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::InvalidConfig`] describing the first bad field.
    pub fn validate(&self) -> Result<(), GcError> {
        let page = sys_alloc::page_size();
        if self.arena_size == 0 || self.arena_size % page != 0 {
            return Err(GcError::InvalidConfig(
                "arena_size must be a non-zero multiple of the page size",
            ));
        }
        if self.commit_increment == 0 || !self.commit_increment.is_power_of_two() {
            return Err(GcError::InvalidConfig(
                "commit_increment must be a power of two",
            ));
        }
        if self.commit_increment % page != 0 {
            return Err(GcError::InvalidConfig(
                "commit_increment must be a multiple of the page size",
            ));
        }
        if self.initial_commit % page != 0 || self.initial_commit > self.arena_size {
            return Err(GcError::InvalidConfig(
                "initial_commit must be page aligned and fit in the arena",
            ));
        }
        if self.trace_chunk_size < 2 {
            return Err(GcError::InvalidConfig(
                "trace_chunk_size must hold at least two entries",
            ));
        }
        if self.alloc_bytes_per_collection == 0 {
            return Err(GcError::InvalidConfig(
                "alloc_bytes_per_collection must be non-zero",
            ));
        }
        Ok(())
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self::new()
    }
}
