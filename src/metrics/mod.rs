//! Cache Metrics System
//!
//! Lock-free counters for the cache and its persist queue, reported through
//! the [`CacheMetrics`] trait as a `BTreeMap<String, f64>`.
//!
//! # Why BTreeMap over HashMap?
//!
//! - **Deterministic ordering**: Metrics always appear in consistent order
//! - **Reproducible output**: Test assertions and log lines compare cleanly
//!
//! The performance difference is negligible with a dozen or so metric keys.
//!
//! # Counters
//!
//! | Source | Counters |
//! |--------|----------|
//! | [`CacheStats`] | hits, misses, loads, load failures, evictions, dirty extensions |
//! | [`PersistStats`] | enqueued, drains, batches, batch failures, persisted, fallback, immediate, skipped, superseded, requeued, dropped |
//!
//! Counters are updated with relaxed atomics; a report taken while the cache
//! is busy is a consistent-enough estimate, not a snapshot.

use std::collections::BTreeMap;

mod cache;
mod persist;

pub use cache::CacheStats;
pub use persist::PersistStats;

/// Trait implemented by every component that reports metrics.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Short name identifying the reporting component.
    fn algorithm_name(&self) -> &'static str;
}
