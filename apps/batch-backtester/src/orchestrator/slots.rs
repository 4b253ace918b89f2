//! Per-slot cache pool reused across every batch of a run.
//!
//! A slot owns exactly one cache pair for the lifetime of the run; the jobs
//! occupying that slot in successive batches share it, so caches amortize
//! warm-up cost across batches rather than per strategy.

use std::fmt;
use std::sync::Arc;

/// Opaque cache handle attached to a worker.
pub trait SlotCache: Send + Sync {}

/// Produces one cache handle per slot at run start.
pub trait CacheFactory: Send + Sync {
    /// Allocate a fresh per-slot cache.
    fn create(&self) -> Arc<dyn SlotCache>;
}

/// The cache pair owned by one slot.
#[derive(Clone, Default)]
pub struct SlotCaches {
    /// Adapter-level cache, if enabled for the run.
    pub adapter: Option<Arc<dyn SlotCache>>,
    /// Storage-level cache, if enabled for the run.
    pub storage: Option<Arc<dyn SlotCache>>,
}

impl fmt::Debug for SlotCaches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotCaches")
            .field("adapter", &self.adapter.is_some())
            .field("storage", &self.storage.is_some())
            .finish()
    }
}

/// Two parallel arrays of optional cache handles, indexed by slot position.
///
/// Allocated once per run, sized to the batch size. Caching is strictly
/// opt-in: an array is populated only when its factory is present.
pub struct SlotCachePool {
    slots: Vec<SlotCaches>,
}

impl SlotCachePool {
    /// Allocate the pool for `batch_size` slots.
    #[must_use]
    pub fn allocate(
        batch_size: usize,
        adapter: Option<&dyn CacheFactory>,
        storage: Option<&dyn CacheFactory>,
    ) -> Self {
        let slots = (0..batch_size)
            .map(|_| SlotCaches {
                adapter: adapter.map(CacheFactory::create),
                storage: storage.map(CacheFactory::create),
            })
            .collect();
        Self { slots }
    }

    /// The cache pair owned by `slot`; empty for out-of-range slots.
    #[must_use]
    pub fn pair(&self, slot: usize) -> SlotCaches {
        self.slots.get(slot).cloned().unwrap_or_default()
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for SlotCachePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotCachePool")
            .field("slots", &self.slots.len())
            .finish()
    }
}
