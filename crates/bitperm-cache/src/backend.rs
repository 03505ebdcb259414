//! The cache backend contract shared by every implementation and consumer.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::CacheResult;

/// Uniform operation set implemented by every cache backend.
///
/// All operations are cancellable by dropping the returned future. Remote
/// implementations bound each command with their own timeout and report it as
/// [`CacheError::Timeout`](crate::CacheError::Timeout).
///
/// # TTL
///
/// A TTL of `None` or zero means the entry never expires.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `Ok(None)` if the key is absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a value with an optional TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove a key. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Remove every key starting with `prefix`.
    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<()>;

    /// Check whether a live entry exists for `key`.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Increment a counter and return the new value.
    ///
    /// An absent counter is created at 1.
    async fn increment(&self, key: &str) -> CacheResult<i64>;

    /// Increment a counter, then set or refresh its expiry.
    async fn increment_with_expire(&self, key: &str, ttl: Duration) -> CacheResult<i64>;

    /// Actively check connectivity.
    async fn ping(&self) -> CacheResult<()>;

    /// Last known availability. Never blocks.
    fn is_available(&self) -> bool;

    /// Release resources and stop background tasks. Safe to call more than once.
    async fn close(&self);

    /// Whether the backend is serving from a fallback store.
    fn is_degraded(&self) -> bool {
        false
    }

    /// Short backend name for logs and health reports.
    fn name(&self) -> &'static str;
}

/// Normalize a TTL: zero means "never expires".
#[inline]
pub fn effective_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|d| !d.is_zero())
}

/// Operation counters for a cache backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CacheStats {
    /// Hit rate as a fraction in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_ttl() {
        assert_eq!(effective_ttl(None), None);
        assert_eq!(effective_ttl(Some(Duration::ZERO)), None);
        assert_eq!(
            effective_ttl(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
