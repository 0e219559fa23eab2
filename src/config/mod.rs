//! Cache Configuration Module
//!
//! Configuration structures for the concurrent cache and its write-back
//! persist queue.
//!
//! # Design Philosophy
//!
//! Configuration structs have all public fields for simple instantiation:
//!
//! - **Simple**: Start from `Default` and override the fields you care about
//! - **Validated once**: [`ConcurrentCache::init`](crate::ConcurrentCache::init)
//!   calls `validate()` and refuses to build a cache from bad parameters
//! - **No boilerplate**: No builder methods needed
//!
//! | Config | Used by | Description |
//! |--------|---------|-------------|
//! | [`CacheConfig`] | [`ConcurrentCache`](crate::ConcurrentCache) | Sharding, table sizing, expiration |
//! | [`PersistConfig`] | [`PersistQueue`](crate::persist::PersistQueue) | Drain gating, batching, retries |
//!
//! # Sizing Guidelines
//!
//! The cache is not capacity bounded: entries leave only by explicit removal
//! or by access-time expiration once fully persisted. `initial_capacity` only
//! pre-sizes the bucket tables, which double whenever a segment's live count
//! would exceed `table_length * load_factor`.
//!
//! ```text
//! segments        = next_power_of_two(concurrency_level)       (max 65_536)
//! table per seg   = next_power_of_two(initial_capacity / segments)
//! ```
//!
//! # Examples
//!
//! ```
//! use writeback_cache::config::CacheConfig;
//! use std::time::Duration;
//!
//! let config = CacheConfig {
//!     concurrency_level: 32,
//!     expire_after_access: Duration::from_secs(30 * 60),
//!     ..CacheConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

mod persist;

pub use persist::PersistConfig;

use crate::error::ConfigError;
use core::fmt;
use std::time::Duration;

/// Largest bucket table a single segment will grow to. Past this size
/// rehashing is skipped and chains simply get longer.
pub const MAXIMUM_CAPACITY: usize = 1 << 30;

/// Upper bound on the number of segments.
pub const MAX_SEGMENTS: usize = 1 << 16;

/// Number of unlocked attempts `len()` makes before locking every segment.
pub const RETRIES_BEFORE_LOCK: usize = 2;

/// Configuration for a [`ConcurrentCache`](crate::ConcurrentCache).
///
/// # Fields
///
/// - `initial_capacity`: Expected number of entries, spread across segments.
/// - `load_factor`: Fill ratio that triggers a segment table resize.
/// - `concurrency_level`: Desired number of independently locked segments,
///   rounded up to a power of two.
/// - `expire_after_access`: Idle time after which a fully persisted entry may
///   be evicted. Dirty entries are never evicted, only extended.
/// - `read_cleanup_interval`: A non-blocking cleanup is attempted from the
///   read path once every this many reads per segment.
#[derive(Clone, Copy, PartialEq)]
pub struct CacheConfig {
    /// Expected number of entries across all segments.
    pub initial_capacity: usize,
    /// Fill ratio that triggers a per-segment table doubling.
    pub load_factor: f32,
    /// Desired number of segments (rounded up to a power of two).
    pub concurrency_level: usize,
    /// Idle time after which a persisted entry becomes eligible for eviction.
    pub expire_after_access: Duration,
    /// Reads per segment between opportunistic cleanup attempts.
    pub read_cleanup_interval: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 16,
            load_factor: 0.75,
            concurrency_level: 16,
            expire_after_access: Duration::from_secs(10 * 60),
            read_cleanup_interval: 64,
        }
    }
}

impl CacheConfig {
    /// Checks every parameter, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load_factor.is_nan() || self.load_factor <= 0.0 {
            return Err(ConfigError::LoadFactor(self.load_factor));
        }
        if self.concurrency_level == 0 {
            return Err(ConfigError::ConcurrencyLevel);
        }
        if self.expire_after_access.is_zero() {
            return Err(ConfigError::ExpireAfterAccess);
        }
        if self.read_cleanup_interval == 0 {
            return Err(ConfigError::ReadCleanupInterval);
        }
        Ok(())
    }

    /// Returns `(segment_count, segment_shift)` for this configuration.
    ///
    /// The segment index is taken from the top bits of the spread hash, so
    /// the shift is `32 - log2(segment_count)`.
    pub(crate) fn segment_layout(&self) -> (usize, u32) {
        let level = self.concurrency_level.min(MAX_SEGMENTS);
        let mut shift = 0u32;
        let mut size = 1usize;
        while size < level {
            shift += 1;
            size <<= 1;
        }
        (size, 32 - shift)
    }

    /// Returns the initial bucket table length of each segment.
    pub(crate) fn segment_capacity(&self, segment_count: usize) -> usize {
        let initial = self.initial_capacity.min(MAXIMUM_CAPACITY);
        let per_segment = initial.div_ceil(segment_count);
        let mut cap = 1;
        while cap < per_segment {
            cap <<= 1;
        }
        cap
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("initial_capacity", &self.initial_capacity)
            .field("load_factor", &self.load_factor)
            .field("concurrency_level", &self.concurrency_level)
            .field("expire_after_access", &self.expire_after_access)
            .field("read_cleanup_interval", &self.read_cleanup_interval)
            .finish()
    }
}
