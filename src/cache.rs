//! Concurrent write-back cache.
//!
//! [`ConcurrentCache`] routes every key to one of a power-of-two number of
//! [`HashSegment`]s, each with its own lock, and couples them with a
//! [`PersistQueue`] that writes dirty entries back to the backing store.
//!
//! ```text
//! ┌───────────────────────────────── ConcurrentCache ─────────────────────────────────┐
//! │                                                                                   │
//! │  spread(hash(key)) ──▶ top bits pick the segment, low bits pick the bucket        │
//! │                                                                                   │
//! │  ┌───────────┐ ┌───────────┐     ┌───────────┐                                    │
//! │  │ Segment 0 │ │ Segment 1 │ ... │ Segment N │ ◀── Loader (on miss, under lock)   │
//! │  └─────┬─────┘ └─────┬─────┘     └─────┬─────┘                                    │
//! │        └─────────────┴── mark_update / mark_delete ──▶ PersistQueue ──▶ Backend   │
//! │                                            ▲                   │                  │
//! │                                            └── mark_persisted ◀┘ (drain thread)   │
//! └───────────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Reads
//!
//! [`get_if_present`](ConcurrentCache::get_if_present) and the first step of
//! [`get`](ConcurrentCache::get) take no lock. A miss on `get` falls back to
//! a locked lookup that loads the key at most once however many threads
//! miss on it concurrently.
//!
//! # Writing Back
//!
//! Values are [`CacheValue`]s made of [`CacheEntry`] cells. After changing an
//! entity through [`CacheEntry::write`], call
//! [`mark_update`](ConcurrentCache::mark_update) (or
//! [`mark_delete`](ConcurrentCache::mark_delete)) so the change is queued. The
//! entry is then protected from expiration until the queue has written its
//! latest snapshot.
//!
//! # Shutdown
//!
//! [`shutdown`](ConcurrentCache::shutdown) rejects further mutation, stops the
//! drain thread and performs a final forced drain on the calling thread.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use writeback_cache::config::{CacheConfig, PersistConfig};
//! use writeback_cache::persist::{PersistBackend, Transaction};
//! use writeback_cache::{CacheEntry, ConcurrentCache, LoadError, Persistable, PersistError};
//!
//! #[derive(Clone)]
//! struct Player { id: u64, gold: u64 }
//!
//! impl Persistable for Player {
//!     type Snapshot = Player;
//!     fn snapshot(&self) -> Player { self.clone() }
//! }
//!
//! struct NoopTxn;
//! impl Transaction<Player> for NoopTxn {
//!     fn upsert(&mut self, _: &Player) -> Result<(), PersistError> { Ok(()) }
//!     fn delete(&mut self, _: &Player) -> Result<(), PersistError> { Ok(()) }
//!     fn commit(&mut self) -> Result<(), PersistError> { Ok(()) }
//!     fn rollback(&mut self) -> Result<(), PersistError> { Ok(()) }
//! }
//!
//! struct Db;
//! impl PersistBackend<Player> for Db {
//!     fn begin(&self) -> Result<Box<dyn Transaction<Player> + '_>, PersistError> {
//!         Ok(Box::new(NoopTxn))
//!     }
//!     fn upsert(&self, _: &Player) -> Result<(), PersistError> { Ok(()) }
//!     fn delete(&self, _: &Player) -> Result<(), PersistError> { Ok(()) }
//! }
//!
//! let loader = |id: &u64| -> Result<Option<CacheEntry<Player>>, LoadError> {
//!     Ok(Some(CacheEntry::new(Player { id: *id, gold: 0 })))
//! };
//! let backend: Arc<dyn PersistBackend<Player>> = Arc::new(Db);
//! let persist = PersistConfig { drain_interval: None, ..PersistConfig::default() };
//! let cache: ConcurrentCache<u64, CacheEntry<Player>> =
//!     ConcurrentCache::init(CacheConfig::default(), persist, loader, backend)?;
//!
//! let player = cache.get(&7)?.expect("loader always finds players");
//! player.write().gold += 100;
//! cache.mark_update(&7, &player)?;
//!
//! let report = cache.shutdown();
//! assert_eq!(report.persisted, 1);
//! assert!(player.is_persisted());
//! # Ok::<(), writeback_cache::CacheError>(())
//! ```

use crate::config::{CacheConfig, PersistConfig, RETRIES_BEFORE_LOCK};
use crate::entry::{CacheEntry, CacheValue, DbState};
use crate::error::{CacheError, Result};
use crate::loader::Loader;
use crate::metrics::{CacheMetrics, CacheStats, PersistStats};
use crate::persist::{DrainReport, PersistBackend, PersistQueue};
use crate::scheduler::DrainScheduler;
use crate::segment::HashSegment;
use crate::ticker::{SystemTicker, Ticker};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[cfg(feature = "hashbrown")]
use hashbrown::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::RandomState as DefaultHashBuilder;

type Snapshot<V> = <<V as CacheValue>::Entity as crate::entry::Persistable>::Snapshot;

/// Avalanche mix applied to every key hash before routing, so that keys
/// whose hashes differ only in a few bits still spread across segments.
#[inline]
fn spread(hash: u64) -> u32 {
    let mut h = (hash ^ (hash >> 32)) as u32;
    h = h.wrapping_add((h << 15) ^ 0xffff_cd7d);
    h ^= h >> 10;
    h = h.wrapping_add(h << 3);
    h ^= h >> 6;
    h = h.wrapping_add((h << 2).wrapping_add(h << 14));
    h ^ (h >> 16)
}

struct CacheInner<K, V: CacheValue, S> {
    segments: Box<[HashSegment<K, V>]>,
    segment_shift: u32,
    segment_mask: usize,
    hash_builder: S,
    loader: Box<dyn Loader<K, V>>,
    queue: PersistQueue<K, V::Entity>,
    stats: Arc<CacheStats>,
    closed: AtomicBool,
    scheduler: Mutex<Option<DrainScheduler>>,
    config: CacheConfig,
}

impl<K, V: CacheValue, S> Drop for CacheInner<K, V, S> {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) && !self.queue.is_empty() {
            warn!(
                pending = self.queue.len(),
                "cache dropped without shutdown, queued snapshots are discarded"
            );
        }
    }
}

/// A sharded, write-back cache of persistable values.
///
/// The handle is cheap to clone; all clones share one cache.
///
/// # Type Parameters
///
/// - `K`: Key type. Must implement `Hash + Eq + Clone + Debug`.
/// - `V`: Value type, a [`CacheEntry`] or [`ListValue`](crate::ListValue)
///   of some [`Persistable`](crate::Persistable) entity.
/// - `S`: Hash builder type. Defaults to `DefaultHashBuilder`.
pub struct ConcurrentCache<K, V: CacheValue, S = DefaultHashBuilder> {
    inner: Arc<CacheInner<K, V, S>>,
}

impl<K, V: CacheValue, S> Clone for ConcurrentCache<K, V, S> {
    fn clone(&self) -> Self {
        ConcurrentCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ConcurrentCache<K, V, DefaultHashBuilder>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: CacheValue,
{
    /// Creates a cache from its configurations, a loader and a persistence
    /// backend. The drain thread is started when
    /// [`PersistConfig::drain_interval`] is set.
    ///
    /// # Errors
    ///
    /// [`CacheError::Config`] if either configuration is invalid and
    /// [`CacheError::Scheduler`] if the drain thread cannot be spawned.
    pub fn init<L>(
        config: CacheConfig,
        persist_config: PersistConfig,
        loader: L,
        backend: Arc<dyn PersistBackend<Snapshot<V>>>,
    ) -> Result<Self>
    where
        L: Loader<K, V> + 'static,
    {
        Self::init_with(
            config,
            persist_config,
            loader,
            backend,
            Arc::new(SystemTicker::new()),
            DefaultHashBuilder::default(),
        )
    }
}

impl<K, V, S> ConcurrentCache<K, V, S>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: CacheValue,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Creates a cache with an explicit time source and hash builder.
    ///
    /// Use this for deterministic expiration in tests or for a DoS-resistant
    /// hasher.
    pub fn init_with<L>(
        config: CacheConfig,
        persist_config: PersistConfig,
        loader: L,
        backend: Arc<dyn PersistBackend<Snapshot<V>>>,
        ticker: Arc<dyn Ticker>,
        hash_builder: S,
    ) -> Result<Self>
    where
        L: Loader<K, V> + 'static,
    {
        config.validate()?;
        let queue = PersistQueue::new(persist_config, backend)?;

        let (segment_count, segment_shift) = config.segment_layout();
        let capacity = config.segment_capacity(segment_count);
        let stats = Arc::new(CacheStats::new());
        let segments: Vec<_> = (0..segment_count)
            .map(|_| HashSegment::new(capacity, &config, Arc::clone(&ticker), Arc::clone(&stats)))
            .collect();

        let inner = Arc::new(CacheInner {
            segments: segments.into_boxed_slice(),
            segment_shift,
            segment_mask: segment_count - 1,
            hash_builder,
            loader: Box::new(loader),
            queue,
            stats,
            closed: AtomicBool::new(false),
            scheduler: Mutex::new(None),
            config,
        });

        if let Some(interval) = persist_config.drain_interval {
            let weak: Weak<CacheInner<K, V, S>> = Arc::downgrade(&inner);
            let scheduler = DrainScheduler::spawn(interval, move |force| {
                let inner = weak.upgrade()?;
                Some(ConcurrentCache { inner }.drain(force))
            })
            .map_err(CacheError::Scheduler)?;
            *inner.scheduler.lock() = Some(scheduler);
        }

        debug!(
            segments = segment_count,
            segment_capacity = capacity,
            drain_interval = ?persist_config.drain_interval,
            "cache initialized"
        );
        Ok(ConcurrentCache { inner })
    }

    #[inline]
    fn hash<Q>(&self, key: &Q) -> u32
    where
        Q: ?Sized + Hash,
    {
        spread(self.inner.hash_builder.hash_one(key))
    }

    #[inline]
    fn segment_for(&self, hash: u32) -> &HashSegment<K, V> {
        let idx = hash.checked_shr(self.inner.segment_shift).unwrap_or(0) as usize
            & self.inner.segment_mask;
        &self.inner.segments[idx]
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    /// Returns the number of segments.
    pub fn segment_count(&self) -> usize {
        self.inner.segments.len()
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the value for `key`, loading it on a miss.
    ///
    /// The loader runs under the owning segment's lock; concurrent misses
    /// on the same key wait for one load and share its result. `Ok(None)`
    /// means the loader found nothing.
    ///
    /// # Errors
    ///
    /// [`CacheError::Load`] if the loader fails. Nothing is cached then.
    pub fn get(&self, key: &K) -> Result<Option<Arc<V>>> {
        let hash = self.hash(key);
        let segment = self.segment_for(hash);
        if let Some(value) = segment.get(key, hash) {
            self.inner.stats.record_hit();
            return Ok(Some(value));
        }
        self.inner.stats.record_miss();
        segment
            .get_or_load(key, hash, &*self.inner.loader)
            .map_err(|source| CacheError::Load {
                key: format!("{key:?}"),
                source,
            })
    }

    /// Returns the value for `key` if it is cached. Never loads or blocks.
    pub fn get_if_present<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hash(key);
        let value = self.segment_for(hash).get(key, hash);
        if value.is_some() {
            self.inner.stats.record_hit();
        } else {
            self.inner.stats.record_miss();
        }
        value
    }

    /// Inserts `value`, returning the value it replaced.
    pub fn put(&self, key: K, value: V) -> Result<Option<Arc<V>>> {
        self.put_arc(key, Arc::new(value), false)
    }

    /// Inserts `value` unless `key` is already cached. Returns the existing
    /// value in that case, `None` if `value` was inserted.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<Arc<V>>> {
        self.put_arc(key, Arc::new(value), true)
    }

    fn put_arc(&self, key: K, value: Arc<V>, only_if_absent: bool) -> Result<Option<Arc<V>>> {
        self.ensure_open()?;
        let hash = self.hash(&key);
        Ok(self.segment_for(hash).put(key, hash, value, only_if_absent))
    }

    /// Removes `key`, returning its value.
    ///
    /// Removal does not queue a delete; mark the entries
    /// [`mark_delete`](Self::mark_delete) first if the backing rows should go
    /// as well.
    pub fn remove<Q>(&self, key: &Q) -> Result<Option<Arc<V>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.ensure_open()?;
        let hash = self.hash(key);
        Ok(self.segment_for(hash).remove(key, hash, None))
    }

    /// Removes `key` only if it currently maps to `expected` (by identity).
    pub fn remove_if_same<Q>(&self, key: &Q, expected: &Arc<V>) -> Result<bool>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.ensure_open()?;
        let hash = self.hash(key);
        Ok(self.segment_for(hash).remove(key, hash, Some(expected)).is_some())
    }

    /// Atomically swaps the value of `key` from `expected` (by identity) to
    /// `value`. Returns `false` if `key` maps to some other value.
    ///
    /// # Errors
    ///
    /// [`CacheError::StaleKey`] if `key` has no live entry.
    pub fn replace<Q>(&self, key: &Q, expected: &Arc<V>, value: V) -> Result<bool>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + fmt::Debug,
    {
        self.ensure_open()?;
        let hash = self.hash(key);
        self.segment_for(hash)
            .replace(key, hash, expected, Arc::new(value))
            .ok_or_else(|| CacheError::stale(&key, "replace"))
    }

    /// Returns `true` if `key` has a live entry. Takes the segment lock.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hash(key);
        self.segment_for(hash).contains_key(key, hash)
    }

    /// Runs `f` against the live value of `key` while holding the segment
    /// lock, so that no put, remove or expiration of `key` interleaves.
    ///
    /// `f` must not call back into this cache for a key of the same segment.
    pub fn with_entry_locked<Q, F, R>(&self, key: &Q, f: F) -> R
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        F: FnOnce(Option<&Arc<V>>) -> R,
    {
        let hash = self.hash(key);
        self.segment_for(hash).do_under_lock(key, hash, f)
    }

    /// Drops every cached entry. Snapshots already queued are still
    /// written.
    pub fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        for segment in self.inner.segments.iter() {
            segment.clear();
        }
        Ok(())
    }

    /// Returns the number of live entries.
    ///
    /// Counts are first summed without locking, twice, checking that no
    /// segment was structurally modified in between. If that does not
    /// settle, every segment is locked in index order and counted.
    pub fn len(&self) -> usize {
        let segments = &self.inner.segments;
        let mut mod_counts = vec![0usize; segments.len()];

        for _ in 0..RETRIES_BEFORE_LOCK {
            let mut sum = 0;
            let mut mod_sum = 0;
            for (segment, mc) in segments.iter().zip(mod_counts.iter_mut()) {
                sum += segment.count();
                *mc = segment.mod_count();
                mod_sum += *mc;
            }
            if mod_sum == 0 {
                return sum;
            }
            let mut check = Some(0);
            for (segment, mc) in segments.iter().zip(mod_counts.iter()) {
                if segment.mod_count() != *mc {
                    check = None;
                    break;
                }
                check = check.map(|c| c + segment.count());
            }
            if check == Some(sum) {
                return sum;
            }
        }

        let guards: Vec<_> = segments.iter().map(|segment| segment.lock()).collect();
        let sum: usize = segments.iter().map(|segment| segment.count()).sum();
        drop(guards);
        sum
    }

    /// Returns `true` if no segment holds a live entry.
    pub fn is_empty(&self) -> bool {
        let segments = &self.inner.segments;
        let mut mod_counts = vec![0usize; segments.len()];
        let mut mod_sum = 0;
        for (segment, mc) in segments.iter().zip(mod_counts.iter_mut()) {
            if segment.count() != 0 {
                return false;
            }
            *mc = segment.mod_count();
            mod_sum += *mc;
        }
        if mod_sum != 0 {
            for (segment, mc) in segments.iter().zip(mod_counts.iter()) {
                if segment.count() != 0 || segment.mod_count() != *mc {
                    return false;
                }
            }
        }
        true
    }

    /// Marks `entry` as changed and queues a snapshot of it.
    ///
    /// Do not hold the entry's write guard while calling this: the snapshot
    /// reads the entity.
    ///
    /// # Errors
    ///
    /// - [`CacheError::StaleKey`] if `key` has no live entry holding `entry`.
    /// - [`CacheError::IllegalTransition`] if `entry` is `DeletePending`.
    /// - [`CacheError::Closed`] after shutdown.
    pub fn mark_update(&self, key: &K, entry: &Arc<CacheEntry<V::Entity>>) -> Result<()> {
        self.mark_dirty(key, entry, DbState::UpdatePending, "mark update")
    }

    /// Marks `entry` for deletion from the backing store and queues a
    /// snapshot of it.
    ///
    /// # Errors
    ///
    /// As for [`mark_update`](Self::mark_update), minus the illegal
    /// transition.
    pub fn mark_delete(&self, key: &K, entry: &Arc<CacheEntry<V::Entity>>) -> Result<()> {
        self.mark_dirty(key, entry, DbState::DeletePending, "mark delete")
    }

    fn mark_dirty(
        &self,
        key: &K,
        entry: &Arc<CacheEntry<V::Entity>>,
        to: DbState,
        operation: &'static str,
    ) -> Result<()> {
        self.ensure_open()?;
        self.with_entry_locked(key, |live| {
            // shutdown cycles every segment lock after closing
            self.ensure_open()?;
            if !live.is_some_and(|value| value.holds(entry)) {
                return Err(CacheError::stale(key, operation));
            }
            let from = entry.db_state();
            if from == DbState::DeletePending && to == DbState::UpdatePending {
                return Err(CacheError::IllegalTransition { from, to });
            }
            entry.set_db_state(to);
            self.inner.queue.enqueue(key.clone(), entry);
            Ok(())
        })
    }

    /// Resets `entry` to `Persisted` if no queued snapshot references it.
    ///
    /// Returns `Ok(false)` when the entry is still referenced: it was dirtied
    /// again and must stay dirty. Callers must not assume success.
    ///
    /// # Errors
    ///
    /// [`CacheError::StaleKey`] if `key` has no live entry holding `entry`.
    pub fn mark_persisted(&self, key: &K, entry: &Arc<CacheEntry<V::Entity>>) -> Result<bool> {
        self.with_entry_locked(key, |live| {
            if !live.is_some_and(|value| value.holds(entry)) {
                return Err(CacheError::stale(key, "mark persisted"));
            }
            Ok(entry.try_mark_persisted())
        })
    }

    /// Writes `entry` to the backend right away, bypassing the queue, and
    /// resets it to `Persisted` if nothing else is queued for it.
    ///
    /// Returns `Ok(false)` when queued snapshots still reference the entry;
    /// the next drain writes those as usual. A clean entry is not written.
    ///
    /// # Errors
    ///
    /// - [`CacheError::StaleKey`] if `key` has no live entry holding `entry`.
    /// - [`CacheError::Persist`] if the backend rejects the write.
    /// - [`CacheError::Closed`] after shutdown.
    pub fn persist_now(&self, key: &K, entry: &Arc<CacheEntry<V::Entity>>) -> Result<bool> {
        self.ensure_open()?;
        self.with_entry_locked(key, |live| {
            if live.is_some_and(|value| value.holds(entry)) {
                Ok(())
            } else {
                Err(CacheError::stale(key, "persist now"))
            }
        })?;
        self.inner
            .queue
            .persist_now(key, entry, &|key: &K, entry: &Arc<CacheEntry<V::Entity>>| {
                self.mark_persisted(key, entry)
            })
    }

    /// Runs a drain on the calling thread. Without `force` the queue's gate
    /// decides whether anything is written.
    pub fn drain(&self, force: bool) -> DrainReport {
        self.inner
            .queue
            .drain(force, &|key: &K, entry: &Arc<CacheEntry<V::Entity>>| {
                self.mark_persisted(key, entry)
            })
    }

    /// Forces a drain and waits for it. Runs on the drain thread when there
    /// is one, otherwise on the calling thread.
    pub fn flush(&self) -> DrainReport {
        let scheduled = self
            .inner
            .scheduler
            .lock()
            .as_ref()
            .and_then(DrainScheduler::run_now);
        scheduled.unwrap_or_else(|| self.drain(true))
    }

    /// Rejects all further mutation, stops the drain thread and writes back
    /// everything still queued. Blocks until that final drain is done.
    ///
    /// Dirty marks racing the call are either rejected with
    /// [`CacheError::Closed`] or written by the final drain. Reads keep
    /// working. A second call returns an empty report.
    ///
    /// Must not be called from inside [`with_entry_locked`](Self::with_entry_locked).
    pub fn shutdown(&self) -> DrainReport {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return DrainReport::default();
        }
        let scheduler = self.inner.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown();
        }
        // dirty marks re-check `closed` under their segment lock, so once
        // every lock has been taken no further snapshot can be queued
        for segment in self.inner.segments.iter() {
            drop(segment.lock());
        }
        let report = self.drain(true);
        info!(
            persisted = report.persisted + report.fallback_persisted,
            dropped = report.dropped,
            remaining = self.inner.queue.len(),
            "cache shut down"
        );
        report
    }

    /// Number of distinct entries waiting to be written back.
    pub fn pending_persist(&self) -> usize {
        self.inner.queue.len()
    }

    /// Lookup, load and expiration counters.
    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }

    /// Drain and backend counters.
    pub fn persist_stats(&self) -> &PersistStats {
        self.inner.queue.stats()
    }
}

impl<K, V, S> CacheMetrics for ConcurrentCache<K, V, S>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: CacheValue,
    S: BuildHasher + Send + Sync + 'static,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.inner.stats.to_btreemap();
        metrics.extend(self.inner.queue.metrics());
        metrics.insert("entries".to_string(), self.len() as f64);
        metrics.insert("segments".to_string(), self.segment_count() as f64);
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "WRITE_BACK"
    }
}

impl<K, V: CacheValue, S> fmt::Debug for ConcurrentCache<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentCache")
            .field("segments", &self.inner.segments.len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
