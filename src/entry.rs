//! Persistable cache values and their dirty-state bookkeeping.
//!
//! Every value stored in a [`ConcurrentCache`](crate::ConcurrentCache) is made
//! of one or more [`CacheEntry`] cells. Each cell wraps an application entity
//! together with:
//!
//! - a [`DbState`] saying whether the entity matches the backing store, and
//! - a pending-write counter: the number of persist-queue snapshots that
//!   still reference the cell.
//!
//! # State Machine
//!
//! ```text
//!            mark_update / mark_delete
//!   ┌───────────┐ ───────────────────▶ ┌───────────────┐
//!   │ Persisted │                      │ UpdatePending │
//!   └───────────┘ ◀─────────────────── │ DeletePending │
//!                 pending == 0, checked └───────────────┘
//!                 under the segment lock
//! ```
//!
//! A `DeletePending` entry cannot go straight back to `UpdatePending`; a
//! logical re-create has to observe `Persisted` first.
//!
//! # Eviction
//!
//! A value is eligible for silent eviction only when
//! [`CacheValue::is_all_persisted`] holds. Expiration never drops a value
//! carrying an unpersisted write.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Dirty-state of a cached entity relative to the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DbState {
    /// In sync with the backing store.
    Persisted = 0,
    /// Holds changes that must be upserted.
    UpdatePending = 1,
    /// Must be deleted from the backing store.
    DeletePending = 2,
}

impl DbState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => DbState::UpdatePending,
            2 => DbState::DeletePending,
            _ => DbState::Persisted,
        }
    }

    /// Returns `true` for both pending states.
    #[inline]
    pub fn is_dirty(self) -> bool {
        self != DbState::Persisted
    }
}

/// An entity type the persist queue can snapshot.
///
/// `snapshot` must produce a copy that shares no mutable state with the live
/// entity: the live entity keeps changing after the snapshot is taken, and
/// the backend only ever sees snapshots.
pub trait Persistable: Send + Sync + 'static {
    /// Immutable persistable form of the entity.
    type Snapshot: Send + Sync + 'static;

    /// Captures the entity's persistable fields.
    fn snapshot(&self) -> Self::Snapshot;
}

/// A value stored in the cache.
///
/// Implemented by [`CacheEntry`] for single-entity values and by
/// [`ListValue`] for values that group several entities under one key.
pub trait CacheValue: Send + Sync + 'static {
    /// The entity type whose entries this value holds.
    type Entity: Persistable;

    /// Returns `true` when every entry this value holds is `Persisted`, i.e.
    /// the value may be silently evicted.
    fn is_all_persisted(&self) -> bool;

    /// Returns `true` if `entry` (by identity) belongs to this value.
    fn holds(&self, entry: &CacheEntry<Self::Entity>) -> bool;
}

/// A single persistable entity plus its dirty-state bookkeeping.
///
/// # Examples
///
/// ```
/// use writeback_cache::{CacheEntry, DbState, Persistable};
///
/// #[derive(Clone)]
/// struct Score { player: u64, points: u32 }
///
/// impl Persistable for Score {
///     type Snapshot = Score;
///     fn snapshot(&self) -> Score { self.clone() }
/// }
///
/// let entry = CacheEntry::new(Score { player: 1, points: 10 });
/// assert_eq!(entry.db_state(), DbState::Persisted);
/// entry.write().points += 5;
/// assert_eq!(entry.read().points, 15);
/// ```
pub struct CacheEntry<E> {
    data: RwLock<E>,
    state: AtomicU8,
    pending: AtomicU32,
    latest_seq: AtomicU64,
}

impl<E> CacheEntry<E> {
    /// Wraps a freshly loaded entity. The entry starts out `Persisted`.
    pub fn new(entity: E) -> Self {
        CacheEntry {
            data: RwLock::new(entity),
            state: AtomicU8::new(DbState::Persisted as u8),
            pending: AtomicU32::new(0),
            latest_seq: AtomicU64::new(0),
        }
    }

    /// Locks the entity for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, E> {
        self.data.read()
    }

    /// Locks the entity for writing.
    ///
    /// Changes are not persisted until the caller marks the entry dirty via
    /// [`ConcurrentCache::mark_update`](crate::ConcurrentCache::mark_update).
    pub fn write(&self) -> RwLockWriteGuard<'_, E> {
        self.data.write()
    }

    /// Current dirty-state.
    #[inline]
    pub fn db_state(&self) -> DbState {
        DbState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of queued snapshots still referencing this entry.
    #[inline]
    pub fn pending_writes(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns `true` when the entry is in sync with the backing store.
    #[inline]
    pub fn is_persisted(&self) -> bool {
        self.db_state() == DbState::Persisted
    }

    // Callers hold the owning segment's lock for every mutator below.

    pub(crate) fn set_db_state(&self, state: DbState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Resets to `Persisted` iff no snapshot is outstanding.
    pub(crate) fn try_mark_persisted(&self) -> bool {
        if self.pending.load(Ordering::Acquire) != 0 {
            return false;
        }
        self.set_db_state(DbState::Persisted);
        true
    }

    /// Registers a new in-flight snapshot. Returns its sequence number and
    /// whether the entry was not queued before.
    pub(crate) fn begin_pending_write(&self) -> (u64, bool) {
        let previous = self.pending.fetch_add(1, Ordering::AcqRel);
        let seq = self.latest_seq.fetch_add(1, Ordering::AcqRel) + 1;
        (seq, previous == 0)
    }

    /// Releases one in-flight snapshot. Returns `true` when none remain.
    pub(crate) fn release_pending_write(&self) -> bool {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "pending-write counter underflow");
        previous == 1
    }

    /// Re-registers a snapshot that is being queued again after a failure.
    pub(crate) fn retain_pending_write(&self) -> bool {
        self.pending.fetch_add(1, Ordering::AcqRel) == 0
    }

    #[inline]
    pub(crate) fn latest_seq(&self) -> u64 {
        self.latest_seq.load(Ordering::Acquire)
    }
}

impl<E: Persistable> CacheEntry<E> {
    pub(crate) fn snapshot(&self) -> E::Snapshot {
        self.data.read().snapshot()
    }
}

impl<E: Persistable> CacheValue for CacheEntry<E> {
    type Entity = E;

    #[inline]
    fn is_all_persisted(&self) -> bool {
        self.is_persisted()
    }

    #[inline]
    fn holds(&self, entry: &CacheEntry<E>) -> bool {
        core::ptr::eq(self, entry)
    }
}

impl<E> fmt::Debug for CacheEntry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("db_state", &self.db_state())
            .field("pending_writes", &self.pending_writes())
            .finish()
    }
}

/// A cache value grouping several entities under a single key, e.g. all
/// inventory rows of one player.
///
/// Entries removed while still dirty stay tracked until they are persisted,
/// so the list keeps reporting unpersisted state and is not evicted before
/// the delete reaches the backend.
pub struct ListValue<E> {
    entries: RwLock<Vec<Arc<CacheEntry<E>>>>,
    removed: Mutex<Vec<Arc<CacheEntry<E>>>>,
}

impl<E> ListValue<E> {
    /// Creates a list from already loaded entries.
    pub fn new(entries: Vec<Arc<CacheEntry<E>>>) -> Self {
        ListValue {
            entries: RwLock::new(entries),
            removed: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of the live entry handles.
    pub fn entries(&self) -> Vec<Arc<CacheEntry<E>>> {
        self.entries.read().clone()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` when the list has no live entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Appends an entry.
    pub fn push(&self, entry: Arc<CacheEntry<E>>) {
        self.entries.write().push(entry);
    }

    /// Returns the first live entry whose entity matches `pred`.
    pub fn find<P>(&self, mut pred: P) -> Option<Arc<CacheEntry<E>>>
    where
        P: FnMut(&E) -> bool,
    {
        self.entries
            .read()
            .iter()
            .find(|e| pred(&e.read()))
            .cloned()
    }

    /// Removes `entry` from the live list. Returns `false` if it was not
    /// present. A dirty entry stays tracked until it is persisted.
    pub fn remove(&self, entry: &Arc<CacheEntry<E>>) -> bool {
        let removed = {
            let mut entries = self.entries.write();
            match entries.iter().position(|e| Arc::ptr_eq(e, entry)) {
                Some(idx) => entries.remove(idx),
                None => return false,
            }
        };
        if !removed.is_persisted() {
            self.removed.lock().push(removed);
        }
        true
    }
}

impl<E: Persistable> CacheValue for ListValue<E> {
    type Entity = E;

    fn is_all_persisted(&self) -> bool {
        if !self.entries.read().iter().all(|e| e.is_persisted()) {
            return false;
        }
        let mut removed = self.removed.lock();
        removed.retain(|e| !e.is_persisted());
        removed.is_empty()
    }

    fn holds(&self, entry: &CacheEntry<E>) -> bool {
        let is_same = |e: &Arc<CacheEntry<E>>| core::ptr::eq(Arc::as_ptr(e), entry);
        self.entries.read().iter().any(is_same) || self.removed.lock().iter().any(is_same)
    }
}

impl<E> fmt::Debug for ListValue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListValue")
            .field("len", &self.entries.read().len())
            .field("removed_pending", &self.removed.lock().len())
            .finish()
    }
}
