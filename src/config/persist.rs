//! Configuration for the write-back persist queue.
//!
//! A drain is attempted on every scheduler tick, but only does real work when
//! one of these holds:
//!
//! ```text
//! force                                 (shutdown, explicit flush)
//! queued entries >= max_units_in_queue  (backlog pressure)
//! tick % check_interval == 0            (periodic)
//! ```
//!
//! The tick counter starts at zero, so the very first drain is periodic.
//!
//! # Examples
//!
//! ```
//! use writeback_cache::config::PersistConfig;
//! use std::time::Duration;
//!
//! // Flush every 500ms tick, in batches of 50
//! let config = PersistConfig {
//!     check_interval: 1,
//!     batch_size: 50,
//!     drain_interval: Some(Duration::from_millis(500)),
//!     ..PersistConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use crate::error::ConfigError;
use core::fmt;
use std::time::Duration;

/// Configuration for a [`PersistQueue`](crate::persist::PersistQueue).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PersistConfig {
    /// High-water mark: a drain proceeds whenever at least this many distinct
    /// dirty entries are queued.
    pub max_units_in_queue: usize,
    /// A drain proceeds on every `check_interval`-th invocation.
    pub check_interval: u64,
    /// Maximum number of items committed in one backend transaction.
    pub batch_size: usize,
    /// Tick period of the background drain scheduler. `None` disables the
    /// scheduler; drains then only happen through explicit calls.
    pub drain_interval: Option<Duration>,
    /// How many times an item that failed on its own is re-queued before it
    /// is dropped.
    pub max_retries: u32,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            max_units_in_queue: 10_000,
            check_interval: 10,
            batch_size: 100,
            drain_interval: Some(Duration::from_secs(1)),
            max_retries: 3,
        }
    }
}

impl PersistConfig {
    /// Checks every parameter, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::BatchSize);
        }
        if self.check_interval == 0 {
            return Err(ConfigError::CheckInterval);
        }
        if self.drain_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::DrainInterval);
        }
        Ok(())
    }
}

impl fmt::Debug for PersistConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistConfig")
            .field("max_units_in_queue", &self.max_units_in_queue)
            .field("check_interval", &self.check_interval)
            .field("batch_size", &self.batch_size)
            .field("drain_interval", &self.drain_interval)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
