#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Architecture
//!
//! ```text
//!   callers ──▶ ConcurrentCache ──▶ HashSegment (one per shard)
//!                    │                  ├─ copy-on-write hash chains (lock-free reads)
//!                    │                  └─ AccessQueue (expiration order, under lock)
//!                    │
//!                    └─ mark_update / mark_delete ──▶ PersistQueue ──▶ PersistBackend
//!                                                          ▲
//!                                     DrainScheduler ──────┘ (periodic, forced on shutdown)
//! ```
//!
//! ## Modules
//!
//! - [`cache`]: The [`ConcurrentCache`] handle: routing, load-through, dirty-state
//!   transitions and shutdown
//! - [`entry`]: [`CacheEntry`], [`ListValue`] and the [`DbState`] machine
//! - [`persist`]: The deduplicating, batching [`PersistQueue`](persist::PersistQueue)
//!   and the backend traits it writes through
//! - [`scheduler`]: The background drain thread
//! - [`loader`]: The load-through capability
//! - [`ticker`]: Time source for access-time expiration
//! - [`config`]: Configuration structures for the cache and its persist queue
//! - [`metrics`]: Counters reported through [`CacheMetrics`]
//! - [`error`]: Error types
//!
//! ## Implementing a Value Type
//!
//! ```rust
//! use writeback_cache::{CacheEntry, CacheValue, ListValue, Persistable};
//!
//! #[derive(Clone)]
//! struct Item { id: u32, count: u32 }
//!
//! impl Persistable for Item {
//!     type Snapshot = Item;
//!     fn snapshot(&self) -> Item { self.clone() }
//! }
//!
//! // One row per key
//! let single = CacheEntry::new(Item { id: 1, count: 3 });
//! assert!(single.is_all_persisted());
//!
//! // Many rows per key, e.g. a player's inventory
//! let inventory = ListValue::new(vec![
//!     std::sync::Arc::new(CacheEntry::new(Item { id: 1, count: 3 })),
//!     std::sync::Arc::new(CacheEntry::new(Item { id: 2, count: 1 })),
//! ]);
//! assert_eq!(inventory.len(), 2);
//! assert!(inventory.is_all_persisted());
//! ```

/// Arena-backed access-order queue driving expiration.
pub(crate) mod access;

/// The concurrent write-back cache.
pub mod cache;

/// Cache configuration structures.
///
/// Provides configuration structures for the cache and its persist queue.
pub mod config;

/// Persistable cache values and their dirty-state bookkeeping.
pub mod entry;

/// Error types.
pub mod error;

/// Load-through capability.
pub mod loader;

/// Cache metrics system.
///
/// Lock-free counters for lookups, loads, expiration and write-back,
/// reported through a common interface.
pub mod metrics;

/// Write-back persist queue and backend traits.
pub mod persist;

/// Background drain scheduler.
pub mod scheduler;

/// Lock-striped hash segments.
pub(crate) mod segment;

/// Time sources.
pub mod ticker;

pub use cache::ConcurrentCache;
pub use entry::{CacheEntry, CacheValue, DbState, ListValue, Persistable};
pub use error::{CacheError, ConfigError, LoadError, PersistError, Result};
pub use loader::Loader;
pub use metrics::CacheMetrics;
pub use persist::{DrainReport, PersistBackend, Transaction};
pub use ticker::{SystemTicker, Ticker};
