use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::EntityKind;

/// Hooks for counting page, record and lock activity.
///
/// Every layer that takes a metrics handle reports through this trait, so a
/// single implementation observes the whole stack. Implementations must be
/// cheap; they are called on hot paths.
pub trait StoreMetrics: Send + Sync {
    /// A page cursor bound a page. `write` is true for write cursors.
    fn page_bound(&self, write: bool);

    /// An optimistic read had to be redone after a concurrent write.
    fn optimistic_retry(&self);

    /// The paged file grew by one page.
    fn page_allocated(&self);

    /// A record cursor decoded one live or checked record.
    fn record_loaded(&self, kind: EntityKind);

    /// A relationship record was linked into its chains.
    fn relationship_created(&self);

    /// A relationship record was unlinked and freed.
    fn relationship_deleted(&self);

    /// A lock request had to wait for another client.
    fn lock_wait(&self, exclusive: bool);
}

/// Discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl StoreMetrics for NoopMetrics {
    fn page_bound(&self, _write: bool) {}
    fn optimistic_retry(&self) {}
    fn page_allocated(&self) {}
    fn record_loaded(&self, _kind: EntityKind) {}
    fn relationship_created(&self) {}
    fn relationship_deleted(&self) {}
    fn lock_wait(&self, _exclusive: bool) {}
}

/// Atomic counters for every [`StoreMetrics`] hook.
#[derive(Default)]
pub struct CounterMetrics {
    /// Pages bound by read cursors.
    pub read_binds: AtomicU64,
    /// Pages bound by write cursors.
    pub write_binds: AtomicU64,
    /// Optimistic reads that were redone.
    pub optimistic_retries: AtomicU64,
    /// Pages allocated.
    pub pages_allocated: AtomicU64,
    /// Node records loaded.
    pub nodes_loaded: AtomicU64,
    /// Relationship records loaded.
    pub relationships_loaded: AtomicU64,
    /// Relationships created.
    pub relationships_created: AtomicU64,
    /// Relationships deleted.
    pub relationships_deleted: AtomicU64,
    /// Shared lock requests that waited.
    pub shared_lock_waits: AtomicU64,
    /// Exclusive lock requests that waited.
    pub exclusive_lock_waits: AtomicU64,
}

impl CounterMetrics {
    /// Reads one counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl StoreMetrics for CounterMetrics {
    fn page_bound(&self, write: bool) {
        let counter = if write {
            &self.write_binds
        } else {
            &self.read_binds
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn optimistic_retry(&self) {
        self.optimistic_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn page_allocated(&self) {
        self.pages_allocated.fetch_add(1, Ordering::Relaxed);
    }

    fn record_loaded(&self, kind: EntityKind) {
        let counter = match kind {
            EntityKind::Node => &self.nodes_loaded,
            EntityKind::Relationship => &self.relationships_loaded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn relationship_created(&self) {
        self.relationships_created.fetch_add(1, Ordering::Relaxed);
    }

    fn relationship_deleted(&self) {
        self.relationships_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn lock_wait(&self, exclusive: bool) {
        let counter = if exclusive {
            &self.exclusive_lock_waits
        } else {
            &self.shared_lock_waits
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics sink, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn StoreMetrics> {
    Arc::new(NoopMetrics)
}
