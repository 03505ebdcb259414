//! Redis cache backend.
//!
//! A thin mapping of [`CacheBackend`] onto a single Redis node through a
//! `deadpool-redis` pool. Every command is bounded by the configured timeout;
//! any connection failure or timeout clears the availability flag, and a
//! successful [`ping`](CacheBackend::ping) sets it again.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;

use crate::backend::{CacheBackend, effective_ttl};
use crate::{CacheError, CacheResult};

/// Number of keys requested per SCAN round trip.
const SCAN_BATCH: usize = 100;

/// Connection settings for [`RedisCache`].
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    pub url: String,
    pub pool_size: usize,
    /// Bound applied to pool waits and to every command.
    pub timeout: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 10,
            timeout: Duration::from_secs(5),
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_connection_refusal()
            || e.is_connection_dropped()
            || e.is_timeout()
        {
            CacheError::unavailable(e.to_string())
        } else {
            CacheError::backend(e.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        CacheError::unavailable(format!("redis pool: {e}"))
    }
}

/// Redis-backed cache.
pub struct RedisCache {
    pool: Pool,
    timeout: Duration,
    available: AtomicBool,
    closed: AtomicBool,
}

impl RedisCache {
    /// Build the connection pool. No connection is opened until first use;
    /// call [`ping`](CacheBackend::ping) to verify connectivity.
    pub fn connect(config: &RedisCacheConfig) -> CacheResult<Self> {
        let mut redis_config = Config::from_url(&config.url);
        if let Some(ref mut pool_config) = redis_config.pool {
            pool_config.max_size = config.pool_size;
            pool_config.timeouts.wait = Some(config.timeout);
            pool_config.timeouts.create = Some(config.timeout);
            pool_config.timeouts.recycle = Some(config.timeout);
        } else {
            let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
            pool_config.timeouts.wait = Some(config.timeout);
            pool_config.timeouts.create = Some(config.timeout);
            pool_config.timeouts.recycle = Some(config.timeout);
            redis_config.pool = Some(pool_config);
        }

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::unavailable(format!("failed to create redis pool: {e}")))?;

        Ok(Self::from_pool(pool, config.timeout))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool, timeout: Duration) -> Self {
        Self {
            pool,
            timeout,
            available: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    async fn connection(&self) -> CacheResult<Connection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(self.pool.get().await?)
    }

    /// Run one command under the timeout and track availability.
    async fn run<T, F>(&self, command: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>> + Send,
    {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                timeout: self.timeout,
            }),
        };

        if let Err(ref e) = result
            && e.is_unavailable()
            && self.available.swap(false, Ordering::AcqRel)
        {
            tracing::warn!(command, error = %e, "redis cache became unavailable");
        }

        result
    }
}

/// Escape glob metacharacters so a prefix matches literally in SCAN MATCH.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

fn ttl_secs(ttl: Duration) -> u64 {
    (ttl.as_secs_f64().ceil() as u64).max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.run("GET", async {
            let mut conn = self.connection().await?;
            let value: Option<Vec<u8>> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        self.run("SET", async {
            let mut conn = self.connection().await?;
            match effective_ttl(ttl) {
                Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?,
                None => conn.set::<_, _, ()>(key, value).await?,
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.run("DEL", async {
            let mut conn = self.connection().await?;
            conn.del::<_, ()>(key).await?;
            Ok(())
        })
        .await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        let pattern = escape_glob(prefix);
        self.run("SCAN", async {
            let mut conn = self.connection().await?;
            let mut cursor: u64 = 0;
            let mut removed = 0usize;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;

                if !batch.is_empty() {
                    removed += batch.len();
                    conn.del::<_, ()>(batch).await?;
                }

                if next == 0 {
                    break;
                }
                cursor = next;
            }
            tracing::debug!(prefix = %prefix, removed, "redis prefix delete");
            Ok(())
        })
        .await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.run("EXISTS", async {
            let mut conn = self.connection().await?;
            let exists: bool = conn.exists(key).await?;
            Ok(exists)
        })
        .await
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        self.run("INCR", async {
            let mut conn = self.connection().await?;
            let value: i64 = conn.incr(key, 1_i64).await?;
            Ok(value)
        })
        .await
    }

    async fn increment_with_expire(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let Some(ttl) = effective_ttl(Some(ttl)) else {
            return self.increment(key).await;
        };

        self.run("INCR", async {
            let mut conn = self.connection().await?;
            let (count,): (i64,) = redis::pipe()
                .atomic()
                .incr(key, 1_i64)
                .expire(key, ttl_secs(ttl) as i64)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(count)
        })
        .await
    }

    async fn ping(&self) -> CacheResult<()> {
        let result = self
            .run("PING", async {
                let mut conn = self.connection().await?;
                let _: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok(())
            })
            .await;

        if result.is_ok() && !self.available.swap(true, Ordering::AcqRel) {
            tracing::info!("redis cache available");
        }
        result
    }

    fn is_available(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.available.load(Ordering::Acquire)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.available.store(false, Ordering::Release);
        self.pool.close();
        tracing::debug!("redis cache closed");
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("perm:user:1:"), "perm:user:1:*");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]*");
    }

    #[test]
    fn test_ttl_secs_rounds_up() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let cache = RedisCache::connect(&RedisCacheConfig {
            url: "redis://127.0.0.1:1".to_string(),
            pool_size: 1,
            timeout: Duration::from_millis(200),
        })
        .unwrap();

        assert!(!cache.is_available());
        let err = cache.ping().await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(!cache.is_available());

        cache.close().await;
        cache.close().await;
        assert!(matches!(cache.get("k").await, Err(CacheError::Closed)));
    }
}
