//! Service health report.

use bitperm_cache::{HealthCheckResult, HealthStatus};
use bitperm_rbac::PermissionCacheStats;
use bitperm_storage::SpaceId;
use serde::Serialize;

use crate::container::AppContainer;

/// Aggregated health of the service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub cache: HealthCheckResult,
    pub storage_ok: bool,
    pub permission_cache: PermissionCacheStats,
    pub strategy: &'static str,
}

impl ServiceHealth {
    /// Probe the cache backend and the storage.
    ///
    /// Storage failure makes the service unhealthy; a degraded or unreachable
    /// cache only degrades it, since checks still answer from storage.
    pub async fn collect(container: &AppContainer) -> Self {
        let cache = container.cache_health.check().await;

        let storage_ok = match container.storage.spaces.find_by_id(SpaceId(0)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "storage health check failed");
                false
            }
        };

        let status = if !storage_ok {
            HealthStatus::Unhealthy
        } else if cache.is_healthy() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            cache,
            storage_ok,
            permission_cache: container.checker.cache_stats(),
            strategy: container.permission_cache.name(),
        }
    }
}
