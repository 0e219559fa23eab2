//! Concurrent Cache Correctness Tests
//!
//! These tests validate the invariants the cache promises while it is used
//! from several threads at once.
//!
//! ## Test Strategy
//!
//! - Concurrent misses on one key share a single load
//! - Lock-free readers never lose a key while writers restructure its chain
//! - An entry dirtied again during a drain is written again, never dropped
//! - A dirty mark racing shutdown is either rejected or written, never stranded
//! - Counts settle to the exact number of live entries

mod common;

use common::{
    build_cache, cache_config, manual_persist, simple_cache, ManualTicker, Record, RecordingBackend,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use writeback_cache::config::PersistConfig;
use writeback_cache::{CacheEntry, CacheError, DbState};

const NUM_THREADS: usize = 8;

// ============================================================================
// SEGMENT 1: LOAD-THROUGH
// ============================================================================

#[test]
fn test_concurrent_misses_load_once() {
    let (cache, backend, _) = simple_cache();
    backend.seed(7, 70);
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get(&7).unwrap().expect("row 7 exists")
            })
        })
        .collect();
    let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(backend.loads(), 1, "exactly one load per key");
    for value in &values {
        assert!(Arc::ptr_eq(value, &values[0]));
    }
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_concurrent_misses_on_distinct_keys() {
    let (cache, backend, _) = simple_cache();
    for id in 0..64 {
        backend.seed(id, id);
    }
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for id in 0..64 {
                    let entry = cache.get(&id).unwrap().unwrap();
                    assert_eq!(entry.read().value, id);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(backend.loads(), 64);
    assert_eq!(cache.len(), 64);
}

// ============================================================================
// SEGMENT 2: COPY-ON-WRITE CHAINS
// ============================================================================

#[test]
fn test_readers_never_lose_stable_keys() {
    let backend = RecordingBackend::new();
    let ticker = Arc::new(ManualTicker::default());
    // one small segment: every write hits the same chains and rehashes
    let config = writeback_cache::config::CacheConfig {
        initial_capacity: 1,
        ..cache_config(1)
    };
    let cache = build_cache(config, manual_persist(), &backend, &ticker);
    for id in 1_000..1_100 {
        cache.put(id, CacheEntry::new(Record::new(id, id))).unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let misses = Arc::new(AtomicUsize::new(0));

    let writer = {
        let cache = cache.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            for round in 0..50u64 {
                for id in 0..200 {
                    cache.put(id, CacheEntry::new(Record::new(id, round))).unwrap();
                }
                for id in 0..200 {
                    cache.remove(&id).unwrap();
                }
            }
            stop.store(true, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..NUM_THREADS - 1)
        .map(|_| {
            let cache = cache.clone();
            let stop = Arc::clone(&stop);
            let misses = Arc::clone(&misses);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    for id in 1_000..1_100 {
                        match cache.get_if_present(&id) {
                            Some(entry) => assert_eq!(entry.read().id, id),
                            None => {
                                misses.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(misses.load(Ordering::SeqCst), 0, "stable keys always visible");
    assert_eq!(cache.len(), 100);
}

#[test]
fn test_len_is_exact_after_concurrent_puts() {
    let (cache, _, _) = simple_cache();
    let per_thread = 500u64;

    let handles: Vec<_> = (0..NUM_THREADS as u64)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..per_thread {
                    let id = t * per_thread + i;
                    cache.put(id, CacheEntry::new(Record::new(id, i))).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.len(), NUM_THREADS * per_thread as usize);
    assert!(!cache.is_empty());
}

// ============================================================================
// SEGMENT 3: WRITE-BACK UNDER CONCURRENCY
// ============================================================================

#[test]
fn test_redirty_during_commit_stays_dirty() {
    let (cache, backend, _) = simple_cache();
    backend.seed(1, 0);
    let entry = cache.get(&1).unwrap().unwrap();

    entry.write().value = 1;
    cache.mark_update(&1, &entry).unwrap();

    let gate = backend.gate_next_commit();
    let drainer = {
        let cache = cache.clone();
        thread::spawn(move || cache.drain(true))
    };

    // commit of value 1 has started and is parked
    gate.wait();
    entry.write().value = 2;
    cache.mark_update(&1, &entry).unwrap();
    gate.wait();

    let report = drainer.join().unwrap();
    assert_eq!(report.persisted, 1);
    assert_eq!(report.still_dirty, 1);
    assert_eq!(backend.row(1), Some(1));
    assert_eq!(entry.db_state(), DbState::UpdatePending);
    assert_eq!(cache.pending_persist(), 1);

    let report = cache.drain(true);
    assert_eq!(report.reconciled, 1);
    assert_eq!(backend.row(1), Some(2));
    assert!(entry.is_persisted());
    assert_eq!(cache.pending_persist(), 0);
}

#[test]
fn test_writers_and_drainer_converge() {
    let backend = RecordingBackend::new();
    let ticker = Arc::new(ManualTicker::default());
    let persist = PersistConfig {
        batch_size: 4,
        ..manual_persist()
    };
    let cache = build_cache(cache_config(4), persist, &backend, &ticker);
    for id in 0..NUM_THREADS as u64 {
        backend.seed(id, 0);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let drainer = {
        let cache = cache.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut drains = 0;
            while !stop.load(Ordering::SeqCst) {
                if cache.drain(false).ran {
                    drains += 1;
                }
            }
            drains
        })
    };

    let writers: Vec<_> = (0..NUM_THREADS as u64)
        .map(|id| {
            let cache = cache.clone();
            thread::spawn(move || {
                let entry = cache.get(&id).unwrap().unwrap();
                for value in 1..=200 {
                    entry.write().value = value;
                    cache.mark_update(&id, &entry).unwrap();
                }
                entry
            })
        })
        .collect();
    let entries: Vec<_> = writers.into_iter().map(|h| h.join().unwrap()).collect();
    stop.store(true, Ordering::SeqCst);
    assert!(drainer.join().unwrap() > 0);

    cache.drain(true);
    for (id, entry) in entries.iter().enumerate() {
        assert_eq!(backend.row(id as u64), Some(200), "row {id} holds the last write");
        assert!(entry.is_persisted(), "entry {id} reconciled");
        assert_eq!(entry.pending_writes(), 0);
    }
    assert_eq!(cache.pending_persist(), 0);

    let stats = cache.persist_stats();
    assert_eq!(stats.enqueued(), NUM_THREADS as u64 * 200);
    assert_eq!(
        stats.superseded() + stats.persisted() + stats.fallback_persisted(),
        stats.enqueued()
    );
}

#[test]
fn test_mark_racing_shutdown_is_never_stranded() {
    let (cache, backend, _) = simple_cache();
    backend.seed(1, 0);
    let entry = cache.get(&1).unwrap().unwrap();

    let locked = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let holder = {
        let cache = cache.clone();
        let locked = Arc::clone(&locked);
        let release = Arc::clone(&release);
        thread::spawn(move || {
            cache.with_entry_locked(&1, |_| {
                locked.wait();
                release.wait();
            })
        })
    };
    locked.wait();

    // passes the open check, then queues up behind the held segment lock
    let marker = {
        let cache = cache.clone();
        let entry = Arc::clone(&entry);
        thread::spawn(move || {
            entry.write().value = 42;
            cache.mark_update(&1, &entry)
        })
    };
    thread::sleep(std::time::Duration::from_millis(50));

    let closer = {
        let cache = cache.clone();
        thread::spawn(move || cache.shutdown())
    };
    while !cache.is_closed() {
        thread::yield_now();
    }
    release.wait();

    holder.join().unwrap();
    let marked = marker.join().unwrap();
    closer.join().unwrap();

    assert!(matches!(marked, Err(CacheError::Closed)), "got {marked:?}");
    assert_eq!(cache.pending_persist(), 0);
    assert!(entry.is_persisted());
    assert_eq!(backend.row(1), Some(0));
}
