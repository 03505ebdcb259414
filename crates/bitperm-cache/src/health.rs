//! Cache health reporting.

use std::time::Instant;

use serde::Serialize;

use crate::DynCacheBackend;

/// Overall cache health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving from the fallback backend.
    Degraded,
    Unhealthy,
}

/// Result of one health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub backend: &'static str,
    pub latency_ms: u64,
    pub is_degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheckResult {
    /// `true` only for [`HealthStatus::Healthy`].
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// `true` unless the cache is unreachable.
    pub fn is_available(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

/// Pings a cache backend and classifies the outcome.
#[derive(Clone)]
pub struct CacheHealthChecker {
    backend: DynCacheBackend,
}

impl CacheHealthChecker {
    pub fn new(backend: DynCacheBackend) -> Self {
        Self { backend }
    }

    pub async fn check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let ping = self.backend.ping().await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let is_degraded = self.backend.is_degraded();

        let (status, message) = match ping {
            Err(e) => {
                tracing::warn!(backend = self.backend.name(), error = %e, "cache health check failed");
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
            Ok(()) if is_degraded => (
                HealthStatus::Degraded,
                Some("serving from fallback cache".to_string()),
            ),
            Ok(()) => (HealthStatus::Healthy, None),
        };

        HealthCheckResult {
            status,
            backend: self.backend.name(),
            latency_ms,
            is_degraded,
            message,
        }
    }
}
