//! Error types for the write-back cache.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: invalid constructor arguments, fatal at construction.
//! - [`CacheError`]: failures surfaced synchronously to cache callers.
//! - [`PersistError`]: failures raised by a [`PersistBackend`](crate::persist::PersistBackend).
//!   These never reach cache callers; the persist queue recovers from them locally.
//! - [`LoadError`]: the boxed error a [`Loader`](crate::loader::Loader) reports.

use crate::entry::DbState;
use thiserror::Error;

/// Boxed error returned by loader capabilities.
pub type LoadError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the public cache API.
pub type Result<T> = core::result::Result<T, CacheError>;

/// Error returned when cache or persist-queue configuration is invalid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The load factor was zero, negative or not a number.
    #[error("load factor must be positive, got {0}")]
    LoadFactor(f32),
    /// The concurrency level (number of segments requested) was zero.
    #[error("concurrency level must be > 0")]
    ConcurrencyLevel,
    /// The access expiration threshold was zero.
    #[error("expire_after_access must be non-zero")]
    ExpireAfterAccess,
    /// The read-path cleanup interval was zero.
    #[error("read_cleanup_interval must be > 0")]
    ReadCleanupInterval,
    /// The persist batch size was zero.
    #[error("batch_size must be > 0")]
    BatchSize,
    /// The persist check interval was zero.
    #[error("check_interval must be > 0")]
    CheckInterval,
    /// The scheduler tick interval was zero.
    #[error("drain_interval must be non-zero when set")]
    DrainInterval,
}

/// Error surfaced to callers of [`ConcurrentCache`](crate::ConcurrentCache).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache could not be constructed.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The key has no live, unexpired entry, or the live entry does not hold
    /// the value the caller referenced. Indicates the caller kept a handle to
    /// state the cache already dropped.
    #[error("no live entry for key {key}, cannot {operation}")]
    StaleKey {
        /// Debug rendering of the key.
        key: String,
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// A dirty-state transition that the state machine forbids.
    #[error("illegal dirty-state transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// State the entry was in.
        from: DbState,
        /// State the caller asked for.
        to: DbState,
    },

    /// The loader failed; nothing was inserted.
    #[error("failed to load key {key}")]
    Load {
        /// Debug rendering of the key.
        key: String,
        /// The loader's error.
        #[source]
        source: LoadError,
    },

    /// The cache has been shut down and rejects mutation.
    #[error("cache is shut down")]
    Closed,

    /// An immediate write-back failed. The entry stays dirty.
    #[error("failed to persist entry")]
    Persist(#[from] PersistError),

    /// The background drain thread could not be started.
    #[error("failed to start drain scheduler")]
    Scheduler(#[source] std::io::Error),
}

impl CacheError {
    pub(crate) fn stale<K: core::fmt::Debug>(key: &K, operation: &'static str) -> Self {
        CacheError::StaleKey {
            key: format!("{key:?}"),
            operation,
        }
    }
}

/// Error reported by a persistence backend.
#[derive(Debug, Error)]
pub enum PersistError {
    /// A recoverable constraint violation, e.g. a duplicate identity left
    /// behind by a racing delete and re-create.
    #[error("persistence conflict: {0}")]
    Conflict(String),

    /// Any other backend failure, including transaction timeouts.
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl PersistError {
    /// Wraps an arbitrary backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        PersistError::Backend(err.into())
    }

    /// Returns `true` for recoverable constraint violations.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PersistError::Conflict(_))
    }
}
