//! Stress Tests for the Concurrent Write-Back Cache
//!
//! These tests verify thread safety under high contention: mixed reads,
//! writes, dirty marking, drains and clock movement all at once.

mod common;

use common::{build_cache, cache_config, Cache, ManualTicker, Record, RecordingBackend, EXPIRY};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use writeback_cache::config::PersistConfig;
use writeback_cache::{CacheEntry, CacheError};

const NUM_THREADS: usize = 16;
const OPS_PER_THREAD: usize = 5_000;
const KEY_SPACE: u64 = 256;

/// xorshift64, seeded per thread.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

fn stress_cache() -> (Cache, Arc<RecordingBackend>, Arc<ManualTicker>) {
    let backend = RecordingBackend::new();
    for id in 0..KEY_SPACE {
        backend.seed(id, 0);
    }
    let ticker = Arc::new(ManualTicker::default());
    let persist = PersistConfig {
        batch_size: 16,
        max_units_in_queue: 32,
        check_interval: 4,
        drain_interval: None,
        ..PersistConfig::default()
    };
    let cache = build_cache(cache_config(8), persist, &backend, &ticker);
    (cache, backend, ticker)
}

fn expected_rejection(err: &CacheError) -> bool {
    matches!(
        err,
        CacheError::StaleKey { .. } | CacheError::IllegalTransition { .. }
    )
}

#[test]
fn stress_mixed_operations() {
    let (cache, _backend, ticker) = stress_cache();
    let barrier = Arc::new(Barrier::new(NUM_THREADS + 2));
    let stop = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = Rng(0x9e37_79b9_7f4a_7c15 ^ (t as u64 + 1));
                barrier.wait();
                for _ in 0..OPS_PER_THREAD {
                    let key = rng.next() % KEY_SPACE;
                    match rng.next() % 10 {
                        0..=3 => {
                            cache.get(&key).unwrap();
                        }
                        4 => {
                            cache.get_if_present(&key);
                        }
                        5 | 6 => {
                            if let Some(entry) = cache.get(&key).unwrap() {
                                entry.write().value += 1;
                                if let Err(err) = cache.mark_update(&key, &entry) {
                                    assert!(expected_rejection(&err), "unexpected {err}");
                                }
                            }
                        }
                        7 => {
                            if let Some(entry) = cache.get_if_present(&key) {
                                if let Err(err) = cache.mark_delete(&key, &entry) {
                                    assert!(expected_rejection(&err), "unexpected {err}");
                                }
                            }
                        }
                        8 => {
                            cache.put(key, CacheEntry::new(Record::new(key, 0))).unwrap();
                        }
                        _ => {
                            cache.remove(&key).unwrap();
                        }
                    }
                }
            })
        })
        .collect();

    let drainer = {
        let cache = cache.clone();
        let barrier = Arc::clone(&barrier);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            barrier.wait();
            while !stop.load(Ordering::SeqCst) {
                cache.drain(false);
            }
        })
    };

    let clock = {
        let barrier = Arc::clone(&barrier);
        let stop = Arc::clone(&stop);
        let ticker = Arc::clone(&ticker);
        thread::spawn(move || {
            barrier.wait();
            while !stop.load(Ordering::SeqCst) {
                ticker.advance(EXPIRY / 8);
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    for worker in workers {
        worker.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    drainer.join().unwrap();
    clock.join().unwrap();

    cache.shutdown();
    assert_eq!(cache.pending_persist(), 0);
    assert!(cache.len() <= KEY_SPACE as usize);
    for key in 0..KEY_SPACE {
        if let Some(entry) = cache.get_if_present(&key) {
            assert!(entry.is_persisted(), "key {key} left dirty after shutdown");
            assert_eq!(entry.pending_writes(), 0);
        }
    }
}

#[test]
fn stress_len_during_churn() {
    let (cache, _, _) = stress_cache();
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..NUM_THREADS / 2)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                let mut rng = Rng(t as u64 * 31 + 7);
                for _ in 0..OPS_PER_THREAD {
                    let key = rng.next() % KEY_SPACE;
                    if rng.next() % 2 == 0 {
                        cache.put(key, CacheEntry::new(Record::new(key, 1))).unwrap();
                    } else {
                        cache.remove(&key).unwrap();
                    }
                }
            })
        })
        .collect();

    let counters: Vec<_> = (0..NUM_THREADS / 2)
        .map(|_| {
            let cache = cache.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut samples = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    assert!(cache.len() <= KEY_SPACE as usize);
                    cache.is_empty();
                    samples += 1;
                }
                samples
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    for counter in counters {
        assert!(counter.join().unwrap() > 0);
    }

    let live = (0..KEY_SPACE)
        .filter(|key| cache.contains_key(key))
        .count();
    assert_eq!(cache.len(), live);
}

#[test]
fn stress_scheduler_with_writers() {
    let backend = RecordingBackend::new();
    for id in 0..KEY_SPACE {
        backend.seed(id, 0);
    }
    let ticker = Arc::new(ManualTicker::default());
    let persist = PersistConfig {
        check_interval: 1,
        batch_size: 32,
        drain_interval: Some(Duration::from_millis(2)),
        ..PersistConfig::default()
    };
    let cache = build_cache(cache_config(8), persist, &backend, &ticker);

    let writers: Vec<_> = (0..NUM_THREADS as u64)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                let key = t;
                let entry = cache.get(&key).unwrap().unwrap();
                for round in 1..=500 {
                    entry.write().value = round;
                    cache.mark_update(&key, &entry).unwrap();
                    if round % 100 == 0 {
                        cache.flush();
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    cache.shutdown();
    for key in 0..NUM_THREADS as u64 {
        assert_eq!(backend.row(key), Some(500));
    }
    assert_eq!(cache.pending_persist(), 0);
}
