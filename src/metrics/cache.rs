//! Read-path and expiration counters.

use super::CacheMetrics;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::BTreeMap;

/// Counters for lookups, load-through and expiration.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    dirty_extensions: AtomicU64,
}

impl CacheStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dirty_extension(&self) {
        self.dirty_extensions.fetch_add(1, Ordering::Relaxed);
    }

    /// Lookups answered from the cache without loading.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found no live entry on the lock-free path.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Loader invocations, successful or not.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Loader invocations that returned an error.
    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    /// Persisted entries dropped by access-time expiration.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Expired entries kept alive because they still carried unpersisted
    /// writes.
    pub fn dirty_extensions(&self) -> u64 {
        self.dirty_extensions.load(Ordering::Relaxed)
    }

    /// Fraction of lookups served from the cache, 0.0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let requests = hits + self.misses();
        if requests > 0 {
            hits as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Converts the counters to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("cache_hits".to_string(), self.hits() as f64);
        metrics.insert("cache_misses".to_string(), self.misses() as f64);
        metrics.insert("dirty_extensions".to_string(), self.dirty_extensions() as f64);
        metrics.insert("evictions".to_string(), self.evictions() as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("load_failures".to_string(), self.load_failures() as f64);
        metrics.insert("loads".to_string(), self.loads() as f64);
        metrics
    }
}

impl CacheMetrics for CacheStats {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "CACHE"
    }
}
