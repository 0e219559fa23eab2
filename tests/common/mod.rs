//! Shared fixtures for the integration tests: a recording backend that can
//! be told to fail or to block, a manual clock and a cache builder wired to
//! both.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use writeback_cache::config::{CacheConfig, PersistConfig};
use writeback_cache::{
    CacheEntry, ConcurrentCache, LoadError, PersistBackend, PersistError, Persistable, Ticker,
    Transaction,
};

/// A row of the backing store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub id: u64,
    pub value: u64,
}

impl Record {
    pub fn new(id: u64, value: u64) -> Self {
        Record { id, value }
    }
}

impl Persistable for Record {
    type Snapshot = Record;

    fn snapshot(&self) -> Record {
        self.clone()
    }
}

pub type Cache = ConcurrentCache<u64, CacheEntry<Record>, RandomState>;

/// Clock advanced by hand.
#[derive(Debug, Default)]
pub struct ManualTicker(AtomicU64);

impl ManualTicker {
    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Ticker for ManualTicker {
    fn read(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Upsert(u64, u64),
    Delete(u64),
}

impl Op {
    fn apply(self, rows: &mut BTreeMap<u64, u64>) {
        match self {
            Op::Upsert(id, value) => {
                rows.insert(id, value);
            }
            Op::Delete(id) => {
                rows.remove(&id);
            }
        }
    }
}

/// In-memory store that records every write it receives.
#[derive(Default)]
pub struct RecordingBackend {
    rows: Mutex<BTreeMap<u64, u64>>,
    /// Every operation made durable, batched or single, in order.
    log: Mutex<Vec<Op>>,
    commits: AtomicUsize,
    single_writes: AtomicUsize,
    loads: AtomicUsize,
    fail_commits: AtomicBool,
    conflict_commits: AtomicBool,
    /// Ids whose writes fail in batches and on their own.
    poisoned: Mutex<HashSet<u64>>,
    /// When set, the next commit waits on this barrier twice: once to
    /// announce that it started and once to be released.
    gate: Mutex<Option<Arc<Barrier>>>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, id: u64, value: u64) {
        self.rows.lock().insert(id, value);
    }

    pub fn row(&self, id: u64) -> Option<u64> {
        self.rows.lock().get(&id).copied()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn log(&self) -> Vec<Op> {
        self.log.lock().clone()
    }

    pub fn writes_for(&self, id: u64) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|op| matches!(op, Op::Upsert(i, _) | Op::Delete(i) if *i == id))
            .count()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn single_writes(&self) -> usize {
        self.single_writes.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn conflict_commits(&self, conflict: bool) {
        self.conflict_commits.store(conflict, Ordering::SeqCst);
    }

    pub fn poison(&self, id: u64) {
        self.poisoned.lock().insert(id);
    }

    pub fn heal(&self, id: u64) {
        self.poisoned.lock().remove(&id);
    }

    /// Makes the next commit block; returns the barrier to rendezvous on.
    pub fn gate_next_commit(&self) -> Arc<Barrier> {
        let barrier = Arc::new(Barrier::new(2));
        *self.gate.lock() = Some(Arc::clone(&barrier));
        barrier
    }

    fn check(&self, id: u64) -> Result<(), PersistError> {
        if self.poisoned.lock().contains(&id) {
            return Err(PersistError::backend(format!("row {id} rejected")));
        }
        Ok(())
    }

    fn load(&self, id: u64) -> Option<CacheEntry<Record>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.row(id).map(|value| CacheEntry::new(Record::new(id, value)))
    }

    fn apply(&self, ops: &[Op]) {
        let mut rows = self.rows.lock();
        let mut log = self.log.lock();
        for op in ops {
            op.apply(&mut rows);
            log.push(*op);
        }
    }
}

struct RecordingTxn<'a> {
    backend: &'a RecordingBackend,
    ops: Vec<Op>,
}

impl Transaction<Record> for RecordingTxn<'_> {
    fn upsert(&mut self, row: &Record) -> Result<(), PersistError> {
        self.backend.check(row.id)?;
        self.ops.push(Op::Upsert(row.id, row.value));
        Ok(())
    }

    fn delete(&mut self, row: &Record) -> Result<(), PersistError> {
        self.backend.check(row.id)?;
        self.ops.push(Op::Delete(row.id));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), PersistError> {
        let gate = self.backend.gate.lock().take();
        if let Some(barrier) = gate {
            barrier.wait();
            barrier.wait();
        }
        if self.backend.conflict_commits.load(Ordering::SeqCst) {
            return Err(PersistError::Conflict("duplicate key".to_string()));
        }
        if self.backend.fail_commits.load(Ordering::SeqCst) {
            return Err(PersistError::backend("transaction timed out"));
        }
        self.backend.apply(&self.ops);
        self.backend.commits.fetch_add(1, Ordering::SeqCst);
        self.ops.clear();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), PersistError> {
        self.ops.clear();
        Ok(())
    }
}

impl PersistBackend<Record> for RecordingBackend {
    fn begin(&self) -> Result<Box<dyn Transaction<Record> + '_>, PersistError> {
        Ok(Box::new(RecordingTxn {
            backend: self,
            ops: Vec::new(),
        }))
    }

    fn upsert(&self, row: &Record) -> Result<(), PersistError> {
        self.check(row.id)?;
        self.single_writes.fetch_add(1, Ordering::SeqCst);
        self.apply(&[Op::Upsert(row.id, row.value)]);
        Ok(())
    }

    fn delete(&self, row: &Record) -> Result<(), PersistError> {
        self.check(row.id)?;
        self.single_writes.fetch_add(1, Ordering::SeqCst);
        self.apply(&[Op::Delete(row.id)]);
        Ok(())
    }
}

pub const EXPIRY: Duration = Duration::from_secs(60);

pub fn cache_config(concurrency_level: usize) -> CacheConfig {
    CacheConfig {
        concurrency_level,
        expire_after_access: EXPIRY,
        ..CacheConfig::default()
    }
}

/// Persist settings without a drain thread and with an ungated drain.
pub fn manual_persist() -> PersistConfig {
    PersistConfig {
        check_interval: 1,
        drain_interval: None,
        ..PersistConfig::default()
    }
}

/// A cache loading from and writing back to `backend`, on a manual clock.
pub fn build_cache(
    config: CacheConfig,
    persist: PersistConfig,
    backend: &Arc<RecordingBackend>,
    ticker: &Arc<ManualTicker>,
) -> Cache {
    let source = Arc::clone(backend);
    let loader = move |id: &u64| -> Result<Option<CacheEntry<Record>>, LoadError> {
        Ok(source.load(*id))
    };
    let shared: Arc<dyn PersistBackend<Record>> = backend.clone();
    let clock: Arc<dyn Ticker> = ticker.clone();
    ConcurrentCache::init_with(config, persist, loader, shared, clock, RandomState::new())
        .expect("valid test configuration")
}

/// Shorthand for a 4-segment cache with a manual drain.
pub fn simple_cache() -> (Cache, Arc<RecordingBackend>, Arc<ManualTicker>) {
    let backend = RecordingBackend::new();
    let ticker = Arc::new(ManualTicker::default());
    let cache = build_cache(cache_config(4), manual_persist(), &backend, &ticker);
    (cache, backend, ticker)
}
