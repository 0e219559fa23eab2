//! Persist-queue counters.

use super::CacheMetrics;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::BTreeMap;

/// Counters describing drain activity and backend outcomes.
#[derive(Debug, Default)]
pub struct PersistStats {
    enqueued: AtomicU64,
    drains: AtomicU64,
    batches: AtomicU64,
    batch_failures: AtomicU64,
    persisted: AtomicU64,
    fallback_persisted: AtomicU64,
    immediate: AtomicU64,
    skipped: AtomicU64,
    superseded: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $get:ident, $doc:literal) => {
        pub(crate) fn $record(&self, n: u64) {
            self.$get.fetch_add(n, Ordering::Relaxed);
        }

        #[doc = $doc]
        pub fn $get(&self) -> u64 {
            self.$get.load(Ordering::Relaxed)
        }
    };
}

impl PersistStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_enqueued, enqueued, "Snapshots accepted by `enqueue`.");
    counter!(record_drains, drains, "Drains that passed the gate and did work.");
    counter!(record_batches, batches, "Transactions committed successfully.");
    counter!(
        record_batch_failures,
        batch_failures,
        "Transactions rolled back and retried item by item."
    );
    counter!(
        record_persisted,
        persisted,
        "Items written as part of a committed transaction."
    );
    counter!(
        record_fallback_persisted,
        fallback_persisted,
        "Items written individually after their batch failed."
    );
    counter!(
        record_immediate,
        immediate,
        "Entries written directly by `persist_now`, outside any drain."
    );
    counter!(
        record_skipped,
        skipped,
        "Items released without a backend call because they were not dirty."
    );
    counter!(
        record_superseded,
        superseded,
        "Items released because a newer snapshot of the same entry was queued."
    );
    counter!(
        record_requeued,
        requeued,
        "Failed items queued again for the next drain."
    );
    counter!(
        record_dropped,
        dropped,
        "Items abandoned after exhausting their retries."
    );

    /// Converts the counters to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("persist_batch_failures".to_string(), self.batch_failures() as f64);
        metrics.insert("persist_batches".to_string(), self.batches() as f64);
        metrics.insert("persist_drains".to_string(), self.drains() as f64);
        metrics.insert("persist_dropped".to_string(), self.dropped() as f64);
        metrics.insert("persist_enqueued".to_string(), self.enqueued() as f64);
        metrics.insert(
            "persist_fallback_persisted".to_string(),
            self.fallback_persisted() as f64,
        );
        metrics.insert("persist_immediate".to_string(), self.immediate() as f64);
        metrics.insert("persist_persisted".to_string(), self.persisted() as f64);
        metrics.insert("persist_requeued".to_string(), self.requeued() as f64);
        metrics.insert("persist_skipped".to_string(), self.skipped() as f64);
        metrics.insert("persist_superseded".to_string(), self.superseded() as f64);
        metrics
    }
}

impl CacheMetrics for PersistStats {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "PERSIST_QUEUE"
    }
}
