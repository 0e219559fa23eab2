//! Load-through capability.
//!
//! A [`Loader`] populates the cache on a miss. It runs while the owning
//! segment's lock is held, which is what guarantees a single load per key
//! under concurrent misses. Consequently a loader must be fast and must never
//! call back into the same cache for a key of the same segment: the segment
//! lock is not reentrant and the call would deadlock.

use crate::error::LoadError;

/// Fetches the value for a key from the backing source.
///
/// Returning `Ok(None)` means the key does not exist; nothing is cached and
/// the caller observes a miss. An `Err` is propagated to the caller as
/// [`CacheError::Load`](crate::CacheError::Load).
///
/// Any `Fn(&K) -> Result<Option<V>, LoadError>` closure is a loader:
///
/// ```
/// use writeback_cache::loader::Loader;
/// use writeback_cache::LoadError;
///
/// let loader = |key: &u32| -> Result<Option<String>, LoadError> {
///     Ok((*key < 10).then(|| format!("row-{key}")))
/// };
/// assert_eq!(loader.load(&3).unwrap(), Some("row-3".to_string()));
/// assert_eq!(loader.load(&42).unwrap(), None);
/// ```
pub trait Loader<K, V>: Send + Sync {
    /// Loads the value for `key`.
    fn load(&self, key: &K) -> Result<Option<V>, LoadError>;
}

impl<K, V, F> Loader<K, V> for F
where
    F: Fn(&K) -> Result<Option<V>, LoadError> + Send + Sync,
{
    #[inline]
    fn load(&self, key: &K) -> Result<Option<V>, LoadError> {
        self(key)
    }
}
