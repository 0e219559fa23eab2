//! Time source for access-time expiration.
//!
//! Segments stamp every access with [`Ticker::read`] and compare the age of
//! the oldest queued entry against
//! [`CacheConfig::expire_after_access`](crate::config::CacheConfig::expire_after_access).
//! Only differences between readings matter, so the origin is arbitrary.

use core::fmt;
use std::time::Instant;

/// A monotonic nanosecond clock.
pub trait Ticker: Send + Sync {
    /// Nanoseconds elapsed since an arbitrary, fixed origin.
    fn read(&self) -> u64;
}

/// [`Ticker`] backed by [`Instant`], anchored when the ticker is created.
pub struct SystemTicker {
    origin: Instant,
}

impl SystemTicker {
    /// Creates a ticker whose origin is now.
    pub fn new() -> Self {
        SystemTicker {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    #[inline]
    fn read(&self) -> u64 {
        // saturates after ~584 years of uptime
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl fmt::Debug for SystemTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemTicker").finish_non_exhaustive()
    }
}
