//! Fixed-window rate limiting on top of a cache backend.

use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use crate::DynCacheBackend;

/// Longest supported window (one year).
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Outcome of one rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub reset_at: OffsetDateTime,
}

/// Counts requests per identifier in fixed windows.
///
/// Keys have the form `ratelimit:{identifier}:{window_bucket}` and expire with
/// their window. When the cache errors the limiter fails open.
#[derive(Clone)]
pub struct RateLimiter {
    cache: DynCacheBackend,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(cache: DynCacheBackend, limit: u32, window: Duration) -> Self {
        Self {
            cache,
            limit,
            window: window.clamp(Duration::from_secs(1), MAX_WINDOW),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record one request for `identifier` and decide whether it may proceed.
    pub async fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_at(identifier, OffsetDateTime::now_utc()).await
    }

    async fn check_at(&self, identifier: &str, now: OffsetDateTime) -> RateLimitDecision {
        let window_secs = self.window.as_secs() as i64;
        let bucket = now.unix_timestamp().div_euclid(window_secs);
        let reset_at = OffsetDateTime::from_unix_timestamp((bucket + 1) * window_secs)
            .unwrap_or(now + self.window);
        let key = format!("ratelimit:{identifier}:{bucket}");

        match self.cache.increment_with_expire(&key, self.window).await {
            Ok(count) => {
                let used = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
                let allowed = used <= self.limit;
                if !allowed {
                    tracing::debug!(identifier, count, limit = self.limit, "rate limit exceeded");
                }
                RateLimitDecision {
                    allowed,
                    limit: self.limit,
                    remaining: self.limit.saturating_sub(used),
                    reset_at,
                }
            }
            Err(e) => {
                tracing::warn!(identifier, error = %e, "rate limiter cache error, allowing request");
                RateLimitDecision {
                    allowed: true,
                    limit: self.limit,
                    remaining: self.limit.saturating_sub(1),
                    reset_at,
                }
            }
        }
    }
}
