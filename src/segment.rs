//! Lock-striped hash segment with copy-on-write chains.
//!
//! A segment owns every key whose spread hash routes to it. Its layout:
//!
//! ```text
//!  ┌──────────────────────────── HashSegment ───────────────────────────┐
//!  │ table: ArcSwap<Table>          (replaced wholesale on rehash)      │
//!  │   bucket[i]: ArcSwapOption<Node> ──▶ Node ──▶ Node ──▶ None        │
//!  │                                    │       │                       │
//!  │                                    ▼       ▼                       │
//!  │                               EntryCell  EntryCell  (key, value,   │
//!  │                                                      access time)  │
//!  │ recency: SegQueue<EntryCell>   (reads noted without the lock)      │
//!  │ state:   Mutex<{ threshold, AccessQueue<EntryCell> }>              │
//!  └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Reads
//!
//! [`HashSegment::get`] never takes the lock. It loads the current table,
//! the bucket head and walks `next` links. Nodes are immutable once
//! published: `put` prepends, `remove` and `rehash` rebuild only the part of
//! a chain whose links would change and reuse the rest. A reader holding an
//! older chain therefore always sees a complete, acyclic list.
//!
//! A read stamps the cell's access time and pushes the cell onto the
//! recency buffer. The access queue itself is re-linked later, under the
//! lock, right before every expiration sweep.
//!
//! # Expiration
//!
//! Sweeps walk the access queue from its oldest end. Expired entries whose
//! value is fully persisted are unlinked; expired entries still carrying
//! unpersisted writes get their clock reset and move to the tail.

use crate::access::{AccessQueue, SlotId};
use crate::config::{CacheConfig, MAXIMUM_CAPACITY};
use crate::entry::CacheValue;
use crate::error::LoadError;
use crate::loader::Loader;
use crate::metrics::CacheStats;
use crate::ticker::Ticker;
use arc_swap::{ArcSwap, ArcSwapOption};
use core::borrow::Borrow;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use crossbeam_queue::SegQueue;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::trace;

/// A cache entry as owned by its segment.
///
/// Chain nodes point at cells; rebuilding a chain clones nodes but shares
/// cells, so a cell's value, access time and queue slot survive
/// copy-on-write.
pub(crate) struct EntryCell<K, V> {
    pub(crate) key: K,
    pub(crate) hash: u32,
    value: ArcSwap<V>,
    access_time: AtomicU64,
    slot: SlotId,
}

impl<K, V> EntryCell<K, V> {
    #[inline]
    pub(crate) fn value(&self) -> Arc<V> {
        self.value.load_full()
    }

    #[inline]
    fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Relaxed)
    }

    #[inline]
    fn stamp(&self, now: u64) {
        self.access_time.store(now, Ordering::Relaxed);
    }
}

struct Node<K, V> {
    cell: Arc<EntryCell<K, V>>,
    next: Option<Arc<Node<K, V>>>,
}

struct Table<K, V> {
    buckets: Box<[ArcSwapOption<Node<K, V>>]>,
}

impl<K, V> Table<K, V> {
    fn with_len(len: usize) -> Self {
        Table {
            buckets: (0..len).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn index(&self, hash: u32) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    #[inline]
    fn bucket(&self, hash: u32) -> &ArcSwapOption<Node<K, V>> {
        &self.buckets[self.index(hash)]
    }
}

/// Mutable segment state, only reachable through the segment lock.
pub(crate) struct SegmentState<K, V> {
    threshold: usize,
    access: AccessQueue<Arc<EntryCell<K, V>>>,
}

/// One shard of a [`ConcurrentCache`](crate::ConcurrentCache).
pub(crate) struct HashSegment<K, V> {
    count: AtomicUsize,
    mod_count: AtomicUsize,
    read_count: AtomicU32,
    table: ArcSwap<Table<K, V>>,
    recency: SegQueue<Arc<EntryCell<K, V>>>,
    state: Mutex<SegmentState<K, V>>,
    load_factor: f32,
    max_table_len: usize,
    expire_after: u64,
    read_cleanup_interval: u32,
    ticker: Arc<dyn Ticker>,
    stats: Arc<CacheStats>,
}

impl<K, V> HashSegment<K, V>
where
    K: Eq + Send + Sync,
    V: CacheValue,
{
    pub(crate) fn new(
        capacity: usize,
        config: &CacheConfig,
        ticker: Arc<dyn Ticker>,
        stats: Arc<CacheStats>,
    ) -> Self {
        let capacity = capacity.max(1);
        HashSegment {
            count: AtomicUsize::new(0),
            mod_count: AtomicUsize::new(0),
            read_count: AtomicU32::new(0),
            table: ArcSwap::from_pointee(Table::with_len(capacity)),
            recency: SegQueue::new(),
            state: Mutex::new(SegmentState {
                threshold: (capacity as f32 * config.load_factor) as usize,
                access: AccessQueue::new(),
            }),
            load_factor: config.load_factor,
            max_table_len: MAXIMUM_CAPACITY,
            expire_after: u64::try_from(config.expire_after_access.as_nanos())
                .unwrap_or(u64::MAX),
            read_cleanup_interval: config.read_cleanup_interval,
            ticker,
            stats,
        }
    }

    /// Caps the bucket table below [`MAXIMUM_CAPACITY`].
    #[cfg(test)]
    fn with_max_table_len(mut self, max_table_len: usize) -> Self {
        self.max_table_len = max_table_len;
        self
    }

    /// Number of live entries. Exact only while the lock is held.
    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Structural modification counter.
    #[inline]
    pub(crate) fn mod_count(&self) -> usize {
        self.mod_count.load(Ordering::Acquire)
    }

    /// Acquires the segment lock. Used by callers that need every segment
    /// frozen at once.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SegmentState<K, V>> {
        self.state.lock()
    }

    /// Current bucket table length.
    #[cfg(test)]
    fn table_len(&self) -> usize {
        self.table.load().len()
    }

    #[inline]
    fn is_expired(&self, cell: &EntryCell<K, V>, now: u64) -> bool {
        now.saturating_sub(cell.access_time()) > self.expire_after
    }

    /// Lock-free lookup of the cell for `key`, live or not.
    fn find<Q>(&self, key: &Q, hash: u32) -> Option<Arc<EntryCell<K, V>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let table = self.table.load();
        let head = table.bucket(hash).load();
        let mut cursor = head.as_deref();
        while let Some(node) = cursor {
            if node.cell.hash == hash && Borrow::<Q>::borrow(&node.cell.key) == key {
                return Some(Arc::clone(&node.cell));
            }
            cursor = node.next.as_deref();
        }
        None
    }

    /// Lock-free read.
    ///
    /// An expired entry triggers a non-blocking sweep. If the value is fully
    /// persisted afterwards the lookup is a miss, even when the sweep could
    /// not run: the locked load path will evict it.
    pub(crate) fn get<Q>(&self, key: &Q, hash: u32) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let now = self.ticker.read();
        let mut result = None;
        if self.count() != 0 {
            if let Some(cell) = self.find(key, hash) {
                let value = cell.value();
                let live = if self.is_expired(&cell, now) {
                    self.try_expire(now);
                    !value.is_all_persisted()
                } else {
                    true
                };
                if live {
                    self.record_read(&cell, now);
                    result = Some(value);
                }
            }
        }
        self.post_read_cleanup(now);
        result
    }

    /// Locked lookup with load-through on a miss.
    ///
    /// The liveness check is repeated under the lock so that concurrent
    /// misses on one key load it once. The loader runs with the lock held.
    pub(crate) fn get_or_load<L>(
        &self,
        key: &K,
        hash: u32,
        loader: &L,
    ) -> Result<Option<Arc<V>>, LoadError>
    where
        K: Clone,
        L: Loader<K, V> + ?Sized,
    {
        let mut state = self.state.lock();
        let now = self.ticker.read();
        self.expire_entries(&mut state, now);

        if let Some(cell) = self.locked_live(&mut state, key, hash, now) {
            self.record_locked_read(&mut state, &cell, now);
            return Ok(Some(cell.value()));
        }

        self.stats.record_load();
        let loaded = match loader.load(key) {
            Ok(loaded) => loaded,
            Err(err) => {
                self.stats.record_load_failure();
                return Err(err);
            }
        };
        Ok(loaded.map(|value| {
            let value = Arc::new(value);
            self.insert(&mut state, key.clone(), hash, Arc::clone(&value), false, now);
            value
        }))
    }

    /// Inserts or replaces the value for `key`. Returns the previous value.
    /// With `only_if_absent` an existing value is left untouched.
    pub(crate) fn put(&self, key: K, hash: u32, value: Arc<V>, only_if_absent: bool) -> Option<Arc<V>> {
        let mut state = self.state.lock();
        let now = self.ticker.read();
        self.expire_entries(&mut state, now);
        self.insert(&mut state, key, hash, value, only_if_absent, now)
    }

    /// Removes the entry for `key`. When `expected` is given the entry is
    /// only removed if it currently holds that exact value.
    pub(crate) fn remove<Q>(&self, key: &Q, hash: u32, expected: Option<&Arc<V>>) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let mut state = self.state.lock();
        let now = self.ticker.read();
        self.expire_entries(&mut state, now);

        let cell = self.find(key, hash)?;
        let value = cell.value();
        if expected.is_some_and(|expected| !Arc::ptr_eq(expected, &value)) {
            return None;
        }
        self.unlink(&mut state, &cell);
        Some(value)
    }

    /// Swaps the value of a live entry if it still holds `expected`.
    /// Returns `None` if there is no live entry.
    pub(crate) fn replace<Q>(
        &self,
        key: &Q,
        hash: u32,
        expected: &Arc<V>,
        value: Arc<V>,
    ) -> Option<bool>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let mut state = self.state.lock();
        let now = self.ticker.read();
        self.expire_entries(&mut state, now);

        let cell = self.locked_live(&mut state, key, hash, now)?;
        if !Arc::ptr_eq(&cell.value(), expected) {
            return Some(false);
        }
        cell.value.store(value);
        self.record_locked_read(&mut state, &cell, now);
        Some(true)
    }

    /// Returns `true` if `key` has a live entry.
    pub(crate) fn contains_key<Q>(&self, key: &Q, hash: u32) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        if self.count() == 0 {
            return false;
        }
        let mut state = self.state.lock();
        let now = self.ticker.read();
        self.locked_live(&mut state, key, hash, now).is_some()
    }

    /// Runs `f` against the live value of `key` while holding the segment
    /// lock. `f` sees `None` if there is no live, unexpired entry.
    pub(crate) fn do_under_lock<Q, F, R>(&self, key: &Q, hash: u32, f: F) -> R
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        F: FnOnce(Option<&Arc<V>>) -> R,
    {
        let mut state = self.state.lock();
        let now = self.ticker.read();
        self.expire_entries(&mut state, now);
        let value = self
            .locked_live(&mut state, key, hash, now)
            .map(|cell| cell.value());
        f(value.as_ref())
    }

    /// Drops every entry regardless of its dirty state.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        if self.count() == 0 {
            return;
        }
        for bucket in self.table.load().buckets.iter() {
            bucket.store(None);
        }
        state.access.clear();
        while self.recency.pop().is_some() {}
        self.mod_count.fetch_add(1, Ordering::AcqRel);
        self.count.store(0, Ordering::Release);
    }

    /// Locked lookup. An expired entry whose value is fully persisted is
    /// evicted on the spot and reported as absent.
    fn locked_live<Q>(
        &self,
        state: &mut SegmentState<K, V>,
        key: &Q,
        hash: u32,
        now: u64,
    ) -> Option<Arc<EntryCell<K, V>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let cell = self.find(key, hash)?;
        if self.is_expired(&cell, now) && cell.value().is_all_persisted() {
            trace!(hash, "evicting expired entry on locked lookup");
            self.unlink(state, &cell);
            self.stats.record_eviction();
            return None;
        }
        Some(cell)
    }

    fn insert(
        &self,
        state: &mut SegmentState<K, V>,
        key: K,
        hash: u32,
        value: Arc<V>,
        only_if_absent: bool,
        now: u64,
    ) -> Option<Arc<V>> {
        let count = self.count();
        if count + 1 > state.threshold {
            self.rehash(state);
        }

        if let Some(cell) = self.find(&key, hash) {
            let old = cell.value();
            if !only_if_absent {
                cell.value.store(value);
                self.record_locked_read(state, &cell, now);
            }
            return Some(old);
        }

        let table = self.table.load();
        let bucket = table.bucket(hash);
        let (_, cell) = state.access.insert_with(|slot| {
            Arc::new(EntryCell {
                key,
                hash,
                value: ArcSwap::new(value),
                access_time: AtomicU64::new(now),
                slot,
            })
        });
        let node = Node {
            cell: Arc::clone(cell),
            next: bucket.load_full(),
        };
        bucket.store(Some(Arc::new(node)));
        self.mod_count.fetch_add(1, Ordering::AcqRel);
        self.count.store(count + 1, Ordering::Release);
        None
    }

    /// Unlinks `target` from its chain and from the access queue.
    ///
    /// Nodes after the removed one are reused; nodes before it are cloned
    /// onto the reused tail, keeping their order.
    fn unlink(&self, state: &mut SegmentState<K, V>, target: &Arc<EntryCell<K, V>>) -> bool {
        let table = self.table.load();
        let bucket = table.bucket(target.hash);
        let head = bucket.load_full();

        let mut prefix = Vec::new();
        let mut cursor = head.as_deref();
        while let Some(node) = cursor {
            if Arc::ptr_eq(&node.cell, target) {
                let mut rebuilt = node.next.clone();
                for cell in prefix.into_iter().rev() {
                    rebuilt = Some(Arc::new(Node { cell, next: rebuilt }));
                }
                bucket.store(rebuilt);
                state.access.remove(target.slot);
                self.mod_count.fetch_add(1, Ordering::AcqRel);
                self.count.store(self.count() - 1, Ordering::Release);
                return true;
            }
            prefix.push(Arc::clone(&node.cell));
            cursor = node.next.as_deref();
        }
        false
    }

    /// Doubles the bucket table.
    ///
    /// For every old chain the longest tail whose nodes all land in the same
    /// new bucket is reused as is; the nodes ahead of it are cloned. The new
    /// table is published in one store, so readers see either table whole.
    fn rehash(&self, state: &mut SegmentState<K, V>) {
        let old = self.table.load_full();
        let old_len = old.len();
        if old_len >= self.max_table_len {
            // chains grow from here on
            state.threshold = usize::MAX;
            return;
        }

        let new_table = Table::with_len(old_len << 1);
        state.threshold = (new_table.len() as f32 * self.load_factor) as usize;

        for bucket in old.buckets.iter() {
            let Some(head) = bucket.load_full() else {
                continue;
            };

            let mut last_run = &head;
            let mut last_idx = new_table.index(head.cell.hash);
            let mut cursor = head.next.as_ref();
            while let Some(node) = cursor {
                let idx = new_table.index(node.cell.hash);
                if idx != last_idx {
                    last_idx = idx;
                    last_run = node;
                }
                cursor = node.next.as_ref();
            }
            new_table.buckets[last_idx].store(Some(Arc::clone(last_run)));

            let mut cursor = Some(&head);
            while let Some(node) = cursor {
                if Arc::ptr_eq(node, last_run) {
                    break;
                }
                let target = new_table.bucket(node.cell.hash);
                let cloned = Node {
                    cell: Arc::clone(&node.cell),
                    next: target.load_full(),
                };
                target.store(Some(Arc::new(cloned)));
                cursor = node.next.as_ref();
            }
        }

        trace!(from = old_len, to = new_table.len(), "rehashed segment");
        self.table.store(Arc::new(new_table));
    }

    /// Sweeps expired entries from the oldest end of the access queue.
    fn expire_entries(&self, state: &mut SegmentState<K, V>, now: u64) {
        self.drain_recency(state);
        while let Some(oldest) = state.access.peek_oldest() {
            if !self.is_expired(oldest, now) {
                break;
            }
            let cell = Arc::clone(oldest);
            if cell.value().is_all_persisted() {
                trace!(hash = cell.hash, "evicting expired entry");
                self.unlink(state, &cell);
                self.stats.record_eviction();
            } else {
                trace!(hash = cell.hash, "extending expired entry with unpersisted writes");
                cell.stamp(now);
                state.access.touch(cell.slot);
                self.stats.record_dirty_extension();
            }
        }
    }

    /// Sweep attempt that gives up if the lock is contended.
    fn try_expire(&self, now: u64) {
        if let Some(mut state) = self.state.try_lock() {
            self.expire_entries(&mut state, now);
        }
    }

    /// Applies reads recorded on the lock-free path to the access queue.
    fn drain_recency(&self, state: &mut SegmentState<K, V>) {
        while let Some(cell) = self.recency.pop() {
            // the slot may have been freed and reused since the read
            let linked = state
                .access
                .get(cell.slot)
                .is_some_and(|current| Arc::ptr_eq(current, &cell));
            if linked {
                state.access.touch(cell.slot);
            }
        }
    }

    #[inline]
    fn record_read(&self, cell: &Arc<EntryCell<K, V>>, now: u64) {
        cell.stamp(now);
        self.recency.push(Arc::clone(cell));
    }

    #[inline]
    fn record_locked_read(&self, state: &mut SegmentState<K, V>, cell: &EntryCell<K, V>, now: u64) {
        cell.stamp(now);
        state.access.touch(cell.slot);
    }

    fn post_read_cleanup(&self, now: u64) {
        let reads = self.read_count.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if reads % self.read_cleanup_interval == 0 {
            self.try_expire(now);
        }
    }
}
