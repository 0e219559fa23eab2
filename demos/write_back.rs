//! Write-Back Cache Walkthrough
//!
//! Runs a small game-server style workload against an in-memory "database":
//! players are loaded on first access, modified in place and written back in
//! batches by the background drain thread. Each player's inventory is a
//! multi-row value.
//!
//! ```sh
//! RUST_LOG=writeback_cache=debug cargo run --example write_back
//! ```

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};
use writeback_cache::config::{CacheConfig, PersistConfig};
use writeback_cache::{
    CacheEntry, CacheMetrics, ConcurrentCache, ListValue, LoadError, PersistBackend, PersistError,
    Persistable, Transaction,
};

/// One inventory row.
#[derive(Clone, Debug)]
struct Item {
    id: u64,
    owner: u64,
    kind: &'static str,
    count: u32,
}

impl Persistable for Item {
    type Snapshot = Item;

    fn snapshot(&self) -> Item {
        self.clone()
    }
}

/// Table of rows keyed by item id.
#[derive(Default)]
struct Database {
    items: Mutex<BTreeMap<u64, Item>>,
    commits: Mutex<u32>,
}

impl Database {
    fn seeded() -> Arc<Self> {
        let db = Database::default();
        {
            let mut items = db.items.lock();
            for owner in 1..=4u64 {
                for (slot, kind) in ["sword", "potion", "arrow"].into_iter().enumerate() {
                    let id = owner * 100 + slot as u64;
                    items.insert(id, Item { id, owner, kind, count: 1 });
                }
            }
        }
        Arc::new(db)
    }

    fn inventory(&self, owner: u64) -> Vec<Item> {
        self.items
            .lock()
            .values()
            .filter(|item| item.owner == owner)
            .cloned()
            .collect()
    }
}

struct Batch<'a> {
    db: &'a Database,
    upserts: Vec<Item>,
    deletes: Vec<u64>,
}

impl Transaction<Item> for Batch<'_> {
    fn upsert(&mut self, item: &Item) -> Result<(), PersistError> {
        self.upserts.push(item.clone());
        Ok(())
    }

    fn delete(&mut self, item: &Item) -> Result<(), PersistError> {
        self.deletes.push(item.id);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), PersistError> {
        let mut items = self.db.items.lock();
        for item in self.upserts.drain(..) {
            items.insert(item.id, item);
        }
        for id in self.deletes.drain(..) {
            items.remove(&id);
        }
        *self.db.commits.lock() += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), PersistError> {
        self.upserts.clear();
        self.deletes.clear();
        Ok(())
    }
}

impl PersistBackend<Item> for Database {
    fn begin(&self) -> Result<Box<dyn Transaction<Item> + '_>, PersistError> {
        Ok(Box::new(Batch {
            db: self,
            upserts: Vec::new(),
            deletes: Vec::new(),
        }))
    }

    fn upsert(&self, item: &Item) -> Result<(), PersistError> {
        self.items.lock().insert(item.id, item.clone());
        Ok(())
    }

    fn delete(&self, item: &Item) -> Result<(), PersistError> {
        self.items.lock().remove(&item.id);
        Ok(())
    }
}

type Inventories = ConcurrentCache<u64, ListValue<Item>>;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();

    let db = Database::seeded();
    let source = Arc::clone(&db);
    let loader = move |owner: &u64| -> Result<Option<ListValue<Item>>, LoadError> {
        let rows = source.inventory(*owner);
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(ListValue::new(
            rows.into_iter().map(|item| Arc::new(CacheEntry::new(item))).collect(),
        )))
    };

    let config = CacheConfig {
        concurrency_level: 4,
        expire_after_access: Duration::from_secs(30),
        ..CacheConfig::default()
    };
    let persist = PersistConfig {
        check_interval: 2,
        batch_size: 8,
        drain_interval: Some(Duration::from_millis(50)),
        ..PersistConfig::default()
    };
    let backend: Arc<dyn PersistBackend<Item>> = db.clone();
    let cache: Inventories = ConcurrentCache::init(config, persist, loader, backend)?;

    println!("Write-back cache walkthrough");
    println!("============================\n");

    // Four "sessions" drink potions and fire arrows concurrently.
    let sessions: Vec<_> = (1..=4u64)
        .map(|owner| {
            let cache = cache.clone();
            thread::spawn(move || -> writeback_cache::Result<()> {
                for _ in 0..25 {
                    let Some(inventory) = cache.get(&owner)? else {
                        continue;
                    };
                    if let Some(arrows) = inventory.find(|item| item.kind == "arrow") {
                        arrows.write().count += 3;
                        cache.mark_update(&owner, &arrows)?;
                    }
                    thread::sleep(Duration::from_millis(2));
                }
                Ok(())
            })
        })
        .collect();
    for session in sessions {
        session.join().map_err(|_| "session panicked")??;
    }

    // Player 2 consumes their potion: the row is deleted on write-back.
    if let Some(inventory) = cache.get(&2)? {
        if let Some(potion) = inventory.find(|item| item.kind == "potion") {
            cache.mark_delete(&2, &potion)?;
            inventory.remove(&potion);
        }
    }

    println!("queued before flush: {}", cache.pending_persist());
    let report = cache.flush();
    println!(
        "flush: popped={} persisted={} superseded={}",
        report.popped,
        report.persisted + report.fallback_persisted,
        report.superseded
    );

    let shutdown = cache.shutdown();
    println!("shutdown drain popped {} items\n", shutdown.popped);

    for owner in 1..=4u64 {
        let rows: Vec<_> = db
            .inventory(owner)
            .into_iter()
            .map(|item| format!("{}x{}", item.kind, item.count))
            .collect();
        println!("player {owner}: {}", rows.join(", "));
    }
    println!("\ncommitted transactions: {}", *db.commits.lock());

    println!("\n{} metrics:", cache.algorithm_name());
    for (name, value) in cache.metrics() {
        println!("  {name:<28} {value}");
    }
    Ok(())
}
