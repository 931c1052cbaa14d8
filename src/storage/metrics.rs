use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Trait for observing row-level activity in the store.
///
/// Implementations receive one callback per row version written or
/// tombstoned, per rejected uniqueness write, and per reverse-index probe.
pub trait StorageMetrics: Send + Sync {
    /// Records a new current row in `table`.
    fn row_written(&self, table: &'static str);

    /// Records `count` rows of `table` moved to the tombstoned state.
    fn rows_tombstoned(&self, table: &'static str, count: u64);

    /// Records a write rejected by a partial unique index on `table`.
    fn uniqueness_conflict(&self, table: &'static str);

    /// Records a reverse-index probe.
    ///
    /// # Parameters
    /// * `index` - `"alias"`, `"prefix"`, or `"phonetic"`.
    /// * `hit` - Whether at least one match was returned.
    fn lookup(&self, index: &'static str, hit: bool);
}

/// A no-op implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn row_written(&self, _table: &'static str) {}
    fn rows_tombstoned(&self, _table: &'static str, _count: u64) {}
    fn uniqueness_conflict(&self, _table: &'static str) {}
    fn lookup(&self, _index: &'static str, _hit: bool) {}
}

/// A thread-safe counter-based implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of row versions inserted.
    pub rows_written: AtomicU64,

    /// Number of row versions tombstoned.
    pub rows_tombstoned: AtomicU64,

    /// Number of writes rejected by uniqueness constraints.
    pub uniqueness_conflicts: AtomicU64,

    /// Number of alias hash probes.
    pub alias_lookups: AtomicU64,

    /// Number of prefix searches.
    pub prefix_lookups: AtomicU64,

    /// Number of phonetic searches.
    pub phonetic_lookups: AtomicU64,

    /// Number of probes that returned nothing.
    pub lookup_misses: AtomicU64,
}

/// Point-in-time copy of a [`CounterMetrics`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// See [`CounterMetrics::rows_written`].
    pub rows_written: u64,
    /// See [`CounterMetrics::rows_tombstoned`].
    pub rows_tombstoned: u64,
    /// See [`CounterMetrics::uniqueness_conflicts`].
    pub uniqueness_conflicts: u64,
    /// See [`CounterMetrics::alias_lookups`].
    pub alias_lookups: u64,
    /// See [`CounterMetrics::prefix_lookups`].
    pub prefix_lookups: u64,
    /// See [`CounterMetrics::phonetic_lookups`].
    pub phonetic_lookups: u64,
    /// See [`CounterMetrics::lookup_misses`].
    pub lookup_misses: u64,
}

impl CounterMetrics {
    /// Reads every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_tombstoned: self.rows_tombstoned.load(Ordering::Relaxed),
            uniqueness_conflicts: self.uniqueness_conflicts.load(Ordering::Relaxed),
            alias_lookups: self.alias_lookups.load(Ordering::Relaxed),
            prefix_lookups: self.prefix_lookups.load(Ordering::Relaxed),
            phonetic_lookups: self.phonetic_lookups.load(Ordering::Relaxed),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
        }
    }
}

impl StorageMetrics for CounterMetrics {
    fn row_written(&self, _table: &'static str) {
        self.rows_written.fetch_add(1, Ordering::Relaxed);
    }

    fn rows_tombstoned(&self, _table: &'static str, count: u64) {
        self.rows_tombstoned.fetch_add(count, Ordering::Relaxed);
    }

    fn uniqueness_conflict(&self, _table: &'static str) {
        self.uniqueness_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    fn lookup(&self, index: &'static str, hit: bool) {
        match index {
            "alias" => {
                self.alias_lookups.fetch_add(1, Ordering::Relaxed);
            }
            "prefix" => {
                self.prefix_lookups.fetch_add(1, Ordering::Relaxed);
            }
            "phonetic" => {
                self.phonetic_lookups.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        if !hit {
            self.lookup_misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
pub fn default_metrics() -> Arc<dyn StorageMetrics> {
    Arc::new(NoopMetrics)
}
