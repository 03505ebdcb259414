//! # bitperm-cache
//!
//! Cache backends for BitPerm with graceful degradation.
//!
//! ## Backends
//!
//! - [`MemoryCache`]: in-process DashMap store with lazy and periodic eviction
//! - [`RedisCache`]: thin adapter over a `deadpool-redis` connection pool
//! - [`FailoverCache`]: wraps a primary and a secondary backend and switches
//!   between them automatically
//!
//! ## Failover
//!
//! ```text
//! operation → FailoverCache ─(mode = Primary)──→ Redis
//!                    │                             │ error
//!                    │                             ▼
//!                    └─(mode = Fallback)──→ MemoryCache
//! ```
//!
//! A background health check pings the primary every 10 seconds and is the only
//! path back to `Primary` mode.
//!
//! ## Consumers
//!
//! - [`CacheHealthChecker`]: healthy / degraded / unhealthy report
//! - [`RateLimiter`]: fixed-window counter built on `increment_with_expire`

pub mod backend;
pub mod error;
pub mod failover;
pub mod health;
pub mod memory;
pub mod ratelimit;
pub mod redis;

pub use backend::{CacheBackend, CacheStats, effective_ttl};
pub use error::{CacheError, CacheResult};
pub use failover::{CacheMode, FailoverCache, FailoverConfig};
pub use health::{CacheHealthChecker, HealthCheckResult, HealthStatus};
pub use memory::{DEFAULT_SWEEP_INTERVAL, MemoryCache};
pub use ratelimit::{RateLimitDecision, RateLimiter};
pub use redis::{RedisCache, RedisCacheConfig};

/// Type alias for a shareable cache backend.
pub type DynCacheBackend = std::sync::Arc<dyn CacheBackend>;
