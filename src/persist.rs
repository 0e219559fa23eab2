//! Write-back persist queue.
//!
//! Mutators enqueue a snapshot of every entry they mark dirty; a drain later
//! pops the snapshots, writes them to a [`PersistBackend`] in batched
//! transactions and reconciles the outcome back into each entry's
//! [`DbState`].
//!
//! # Pipeline
//!
//! ```text
//!  mark_update ──▶ enqueue ──▶ SegQueue<PersistItem> ──▶ drain (gated)
//!                                                          │
//!                              ┌───────────────────────────┤ pop, release pending
//!                              ▼                           │
//!                     superseded / not dirty?  ── yes ──▶ drop
//!                              │ no
//!                              ▼
//!                     batch ── full or queue empty ──▶ begin, write*, commit
//!                                                          │
//!                                   ok ◀───────────────────┴──────▶ err: rollback
//!                                   │                                 │
//!                                   ▼                                 ▼
//!                               reconcile ◀──── ok ──── single-item upsert/delete
//!                                                                     │ err
//!                                                                     ▼
//!                                                       requeue (bounded) or drop
//! ```
//!
//! # Deduplication
//!
//! Every enqueue stamps the entry with a fresh sequence number. A popped
//! item whose sequence is no longer the entry's latest has been superseded
//! by a newer snapshot further back in the queue; it is released without a
//! backend call. Only the most recent snapshot of an entry is ever written.
//!
//! # Pending writes
//!
//! Each enqueue increments the entry's pending-write counter and each pop
//! decrements it, whatever happens to the item afterwards. Reconciliation
//! resets the entry to `Persisted` only if the counter is zero at that
//! moment, so an entry dirtied again while its previous snapshot was being
//! written stays dirty.
//!
//! Drains are serialized internally; enqueue never blocks on a drain.

use crate::config::PersistConfig;
use crate::entry::{CacheEntry, DbState, Persistable};
use crate::error::{ConfigError, PersistError, Result};
use crate::metrics::{CacheMetrics, PersistStats};
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// An open backend transaction.
///
/// Writes are buffered until [`commit`](Transaction::commit). After a failed
/// write or commit the queue calls [`rollback`](Transaction::rollback) and
/// drops the transaction.
pub trait Transaction<S> {
    /// Inserts or updates the row described by `snapshot`.
    fn upsert(&mut self, snapshot: &S) -> core::result::Result<(), PersistError>;

    /// Deletes the row described by `snapshot`.
    fn delete(&mut self, snapshot: &S) -> core::result::Result<(), PersistError>;

    /// Makes every buffered write durable.
    fn commit(&mut self) -> core::result::Result<(), PersistError>;

    /// Discards every buffered write.
    fn rollback(&mut self) -> core::result::Result<(), PersistError>;
}

/// The store dirty entries are written back to.
///
/// Besides transactions a backend offers non-transactional single-item
/// writes, used to salvage the items of a failed batch one by one.
pub trait PersistBackend<S>: Send + Sync {
    /// Opens a transaction.
    fn begin(&self) -> core::result::Result<Box<dyn Transaction<S> + '_>, PersistError>;

    /// Upserts a single item outside any batch.
    fn upsert(&self, snapshot: &S) -> core::result::Result<(), PersistError>;

    /// Deletes a single item outside any batch.
    fn delete(&self, snapshot: &S) -> core::result::Result<(), PersistError>;
}

/// Resets a successfully written entry to `Persisted`.
///
/// Returns `Ok(true)` if the entry was reset, `Ok(false)` if it is still
/// referenced by queued snapshots, and an error if the key no longer holds
/// the entry. The cache implements this with
/// [`ConcurrentCache::mark_persisted`](crate::ConcurrentCache::mark_persisted).
pub trait Reconcile<K, E> {
    /// Attempts the transition to `Persisted`.
    fn reconcile(&self, key: &K, entry: &Arc<CacheEntry<E>>) -> Result<bool>;
}

impl<K, E, F> Reconcile<K, E> for F
where
    F: Fn(&K, &Arc<CacheEntry<E>>) -> Result<bool>,
{
    fn reconcile(&self, key: &K, entry: &Arc<CacheEntry<E>>) -> Result<bool> {
        self(key, entry)
    }
}

/// An immutable snapshot of a dirty entry, captured at enqueue time.
pub(crate) struct PersistItem<K, E: Persistable> {
    key: K,
    entry: Arc<CacheEntry<E>>,
    state: DbState,
    snapshot: E::Snapshot,
    seq: u64,
    attempts: u32,
}

impl<K, E: Persistable> PersistItem<K, E> {
    fn is_superseded(&self) -> bool {
        self.seq != self.entry.latest_seq()
    }
}

impl<K: fmt::Debug, E: Persistable> fmt::Debug for PersistItem<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistItem")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("seq", &self.seq)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Outcome of one [`PersistQueue::drain`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Value of the drain counter for this call.
    pub tick: u64,
    /// `false` when the gate skipped this call.
    pub ran: bool,
    /// Items taken off the queue.
    pub popped: usize,
    /// Items released because a newer snapshot of the entry was queued.
    pub superseded: usize,
    /// Items released because their captured state was not dirty.
    pub skipped: usize,
    /// Transactions committed.
    pub batches: usize,
    /// Transactions rolled back.
    pub failed_batches: usize,
    /// Items written by a committed transaction.
    pub persisted: usize,
    /// Items written one by one after their batch failed.
    pub fallback_persisted: usize,
    /// Written items whose entry was reset to `Persisted`.
    pub reconciled: usize,
    /// Written items whose entry stayed dirty because of newer writes.
    pub still_dirty: usize,
    /// Failed items queued again for the next drain.
    pub requeued: usize,
    /// Failed items abandoned after exhausting their retries.
    pub dropped: usize,
}

impl DrainReport {
    fn skipped_tick(tick: u64) -> Self {
        DrainReport {
            tick,
            ..DrainReport::default()
        }
    }
}

/// Deduplicating, batching queue of dirty entries.
///
/// `len` counts distinct entries with at least one queued snapshot, which is
/// what the `max_units_in_queue` pressure gate compares against.
pub struct PersistQueue<K, E: Persistable> {
    items: SegQueue<PersistItem<K, E>>,
    units: AtomicUsize,
    ticks: AtomicU64,
    drain_lock: Mutex<()>,
    backend: Arc<dyn PersistBackend<E::Snapshot>>,
    config: PersistConfig,
    stats: PersistStats,
}

impl<K, E: Persistable> PersistQueue<K, E> {
    /// Number of distinct entries with queued snapshots.
    pub fn len(&self) -> usize {
        self.units.load(Ordering::Acquire)
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued snapshots, superseded ones included.
    pub fn queued_items(&self) -> usize {
        self.items.len()
    }

    /// The queue's configuration.
    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// Drain and backend counters.
    pub fn stats(&self) -> &PersistStats {
        &self.stats
    }
}

impl<K, E> PersistQueue<K, E>
where
    K: fmt::Debug + Send + Sync + 'static,
    E: Persistable,
{
    /// Creates an empty queue writing to `backend`.
    pub fn new(
        config: PersistConfig,
        backend: Arc<dyn PersistBackend<E::Snapshot>>,
    ) -> core::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(PersistQueue {
            items: SegQueue::new(),
            units: AtomicUsize::new(0),
            ticks: AtomicU64::new(0),
            drain_lock: Mutex::new(()),
            backend,
            config,
            stats: PersistStats::new(),
        })
    }

    /// Captures a snapshot of `entry` and appends it.
    ///
    /// The caller must hold the lock of the segment owning `key`, must have
    /// set the entry's dirty-state already, and must not hold the entry's
    /// write guard.
    pub fn enqueue(&self, key: K, entry: &Arc<CacheEntry<E>>) {
        let (seq, first) = entry.begin_pending_write();
        let item = PersistItem {
            key,
            entry: Arc::clone(entry),
            state: entry.db_state(),
            snapshot: entry.snapshot(),
            seq,
            attempts: 0,
        };
        if first {
            self.units.fetch_add(1, Ordering::AcqRel);
        }
        trace!(key = ?item.key, seq, state = ?item.state, "enqueued snapshot");
        self.items.push(item);
        self.stats.record_enqueued(1);
    }

    /// Writes queued snapshots back to the backend.
    ///
    /// Without `force` the call only does work when the queue holds at least
    /// `max_units_in_queue` entries or the drain counter hits a multiple of
    /// `check_interval`. The counter starts at zero, so the first call always
    /// runs. Items that fail on their own are queued again after
    /// this call finishes, so a failing backend cannot keep one drain busy.
    pub fn drain<R>(&self, force: bool, reconcile: &R) -> DrainReport
    where
        R: Reconcile<K, E> + ?Sized,
    {
        let _serialized = self.drain_lock.lock();
        let tick = self.ticks.fetch_add(1, Ordering::AcqRel);
        let units = self.len();
        let proceed = force
            || units >= self.config.max_units_in_queue
            || tick % self.config.check_interval == 0;
        if !proceed {
            debug!(tick, units, "drain gated, nothing to do this tick");
            return DrainReport::skipped_tick(tick);
        }

        self.stats.record_drains(1);
        let mut report = DrainReport {
            tick,
            ran: true,
            ..DrainReport::default()
        };
        let mut batch = Vec::with_capacity(self.config.batch_size.min(units.max(1)));
        let mut retry = Vec::new();

        while let Some(item) = self.items.pop() {
            report.popped += 1;
            self.release(&item.entry);

            if item.is_superseded() {
                report.superseded += 1;
                continue;
            }
            if !item.state.is_dirty() {
                report.skipped += 1;
                continue;
            }

            batch.push(item);
            if batch.len() >= self.config.batch_size {
                self.flush_batch(&mut batch, reconcile, &mut retry, &mut report);
            }
        }
        if !batch.is_empty() {
            self.flush_batch(&mut batch, reconcile, &mut retry, &mut report);
        }

        for item in retry {
            if item.entry.retain_pending_write() {
                self.units.fetch_add(1, Ordering::AcqRel);
            }
            self.items.push(item);
        }

        self.stats.record_superseded(report.superseded as u64);
        self.stats.record_skipped(report.skipped as u64);
        if report.popped > 0 {
            info!(
                tick,
                popped = report.popped,
                persisted = report.persisted + report.fallback_persisted,
                superseded = report.superseded,
                requeued = report.requeued,
                dropped = report.dropped,
                "drained persist queue"
            );
        } else {
            debug!(tick, "drained empty persist queue");
        }
        report
    }

    /// Writes the current state of `entry` straight to the backend, outside
    /// any batch, then reconciles it.
    ///
    /// Holds the drain lock throughout: no drain writes an older snapshot of
    /// the entry between this write and the reconcile. Returns whether the
    /// entry ended up `Persisted`; it stays dirty while queued snapshots still
    /// reference it, and those are written by a later drain as usual.
    ///
    /// # Errors
    ///
    /// [`CacheError::Persist`](crate::CacheError::Persist) if the backend
    /// rejects the write. The entry is left dirty.
    pub fn persist_now<R>(&self, key: &K, entry: &Arc<CacheEntry<E>>, reconcile: &R) -> Result<bool>
    where
        R: Reconcile<K, E> + ?Sized,
    {
        let _serialized = self.drain_lock.lock();
        let state = entry.db_state();
        if !state.is_dirty() {
            return Ok(true);
        }
        let snapshot = entry.snapshot();
        let written = if state == DbState::DeletePending {
            self.backend.delete(&snapshot)
        } else {
            self.backend.upsert(&snapshot)
        };
        if let Err(err) = written {
            warn!(key = ?key, state = ?state, error = %err, "immediate persist failed");
            return Err(err.into());
        }
        self.stats.record_immediate(1);

        match reconcile.reconcile(key, entry) {
            Ok(done) => Ok(done),
            Err(err) => {
                debug!(key = ?key, error = %err, "reconciling entry that left the cache");
                Ok(entry.try_mark_persisted())
            }
        }
    }

    fn release(&self, entry: &CacheEntry<E>) {
        if entry.release_pending_write() {
            self.units.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn flush_batch<R>(
        &self,
        batch: &mut Vec<PersistItem<K, E>>,
        reconcile: &R,
        retry: &mut Vec<PersistItem<K, E>>,
        report: &mut DrainReport,
    ) where
        R: Reconcile<K, E> + ?Sized,
    {
        match self.commit_batch(batch) {
            Ok(()) => {
                report.batches += 1;
                report.persisted += batch.len();
                self.stats.record_batches(1);
                self.stats.record_persisted(batch.len() as u64);
                for item in batch.drain(..) {
                    self.reconcile(&item, reconcile, report);
                }
            }
            Err(err) => {
                report.failed_batches += 1;
                self.stats.record_batch_failures(1);
                if err.is_conflict() {
                    debug!(size = batch.len(), error = %err, "batch conflict, retrying items one by one");
                } else {
                    warn!(size = batch.len(), error = %err, "batch commit failed, retrying items one by one");
                }
                for item in batch.drain(..) {
                    match self.write_single(&item) {
                        Ok(()) => {
                            report.fallback_persisted += 1;
                            self.stats.record_fallback_persisted(1);
                            self.reconcile(&item, reconcile, report);
                        }
                        Err(err) => self.fail(item, &err, retry, report),
                    }
                }
            }
        }
    }

    fn commit_batch(&self, batch: &[PersistItem<K, E>]) -> core::result::Result<(), PersistError> {
        let mut txn = self.backend.begin()?;
        let written = batch
            .iter()
            .try_for_each(|item| match item.state {
                DbState::UpdatePending => txn.upsert(&item.snapshot),
                DbState::DeletePending => txn.delete(&item.snapshot),
                DbState::Persisted => Ok(()),
            })
            .and_then(|()| txn.commit());
        if let Err(err) = written {
            if let Err(rollback_err) = txn.rollback() {
                warn!(error = %rollback_err, "rollback failed");
            }
            return Err(err);
        }
        Ok(())
    }

    fn write_single(&self, item: &PersistItem<K, E>) -> core::result::Result<(), PersistError> {
        match item.state {
            DbState::UpdatePending => self.backend.upsert(&item.snapshot),
            DbState::DeletePending => self.backend.delete(&item.snapshot),
            DbState::Persisted => Ok(()),
        }
    }

    fn fail(
        &self,
        mut item: PersistItem<K, E>,
        err: &PersistError,
        retry: &mut Vec<PersistItem<K, E>>,
        report: &mut DrainReport,
    ) {
        item.attempts += 1;
        if item.attempts <= self.config.max_retries {
            warn!(key = ?item.key, attempts = item.attempts, error = %err, "persist failed, will retry");
            report.requeued += 1;
            self.stats.record_requeued(1);
            retry.push(item);
        } else {
            error!(
                key = ?item.key,
                state = ?item.state,
                attempts = item.attempts,
                error = %err,
                "persist failed, dropping snapshot"
            );
            report.dropped += 1;
            self.stats.record_dropped(1);
        }
    }

    fn reconcile<R>(&self, item: &PersistItem<K, E>, reconcile: &R, report: &mut DrainReport)
    where
        R: Reconcile<K, E> + ?Sized,
    {
        match reconcile.reconcile(&item.key, &item.entry) {
            Ok(true) => report.reconciled += 1,
            Ok(false) => {
                trace!(key = ?item.key, "entry dirtied again while persisting");
                report.still_dirty += 1;
            }
            Err(err) => {
                // no longer cached; nothing can race the reset
                debug!(key = ?item.key, error = %err, "reconciling entry that left the cache");
                if item.entry.try_mark_persisted() {
                    report.reconciled += 1;
                } else {
                    report.still_dirty += 1;
                }
            }
        }
    }
}

impl<K, E: Persistable> CacheMetrics for PersistQueue<K, E> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.stats.to_btreemap();
        metrics.insert(
            "persist_queued_units".to_string(),
            self.units.load(Ordering::Relaxed) as f64,
        );
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "PERSIST_QUEUE"
    }
}

impl<K, E: Persistable> fmt::Debug for PersistQueue<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistQueue")
            .field("units", &self.units.load(Ordering::Relaxed))
            .field("queued_items", &self.items.len())
            .field("ticks", &self.ticks.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish()
    }
}
