//! Dependency wiring.
//!
//! [`AppContainer::build`] constructs every component once from an
//! [`AppConfig`] and hands out shared `Arc`s. Nothing is stored globally.

use std::sync::Arc;

use bitperm_cache::{
    CacheError, CacheHealthChecker, DynCacheBackend, FailoverCache, MemoryCache, RateLimiter,
    RedisCache,
};
use bitperm_db_memory::InMemoryPermissionStore;
use bitperm_db_postgres::{PostgresError, PostgresPermissionStore};
use bitperm_rbac::{
    BackendPermissionCache, PermissionCache, PermissionChecker, PermissionManager,
    TablePermissionCache, UserLocks,
};
use bitperm_storage::StorageSet;

use crate::config::{AppConfig, CacheStrategy, StorageBackend};
use crate::maintenance::{MaintenanceHandle, MaintenanceTask};

/// Errors raised while building the container.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("storage initialization failed: {0}")]
    Storage(#[from] PostgresError),

    #[error("cache initialization failed: {0}")]
    Cache(#[from] CacheError),
}

/// Every long-lived component of the service.
pub struct AppContainer {
    pub config: AppConfig,
    pub storage: StorageSet,
    pub cache_backend: DynCacheBackend,
    pub permission_cache: Arc<dyn PermissionCache>,
    pub locks: Arc<UserLocks>,
    pub manager: Arc<PermissionManager>,
    pub checker: Arc<PermissionChecker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache_health: CacheHealthChecker,
    postgres: Option<Arc<PostgresPermissionStore>>,
    maintenance: Option<MaintenanceHandle>,
}

impl AppContainer {
    /// Build and start every component.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(config: AppConfig) -> Result<Self, StartupError> {
        let (storage, postgres) = build_storage(&config).await?;
        let cache_backend = build_cache_backend(&config).await?;

        let ttl = config.permissions.ttl();
        let permission_cache: Arc<dyn PermissionCache> = match config.permissions.strategy {
            CacheStrategy::Table => Arc::new(TablePermissionCache::new(
                storage.permission_cache.clone(),
                ttl,
            )),
            CacheStrategy::Backend => {
                Arc::new(BackendPermissionCache::new(cache_backend.clone(), ttl))
            }
        };
        tracing::info!(
            strategy = permission_cache.name(),
            ttl_secs = ttl.as_secs(),
            "Permission cache configured"
        );

        let locks = Arc::new(UserLocks::new());
        let manager = Arc::new(PermissionManager::new(
            storage.clone(),
            permission_cache.clone(),
            locks.clone(),
        ));
        let checker = Arc::new(PermissionChecker::new(
            storage.clone(),
            permission_cache.clone(),
            locks.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            cache_backend.clone(),
            config.rate_limit.limit,
            config.rate_limit.window(),
        ));
        let cache_health = CacheHealthChecker::new(cache_backend.clone());

        let maintenance = MaintenanceTask::new(
            permission_cache.clone(),
            locks.clone(),
            config.permissions.maintenance_interval(),
        )
        .start();

        Ok(Self {
            config,
            storage,
            cache_backend,
            permission_cache,
            locks,
            manager,
            checker,
            rate_limiter,
            cache_health,
            postgres,
            maintenance: Some(maintenance),
        })
    }

    /// Stop background tasks and release connections.
    pub async fn shutdown(mut self) {
        if let Some(maintenance) = self.maintenance.take() {
            maintenance.stop().await;
        }
        self.cache_backend.close().await;
        if let Some(postgres) = &self.postgres {
            postgres.close().await;
        }
        tracing::info!("Shutdown complete");
    }
}

async fn build_storage(
    config: &AppConfig,
) -> Result<(StorageSet, Option<Arc<PostgresPermissionStore>>), StartupError> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            Ok((InMemoryPermissionStore::new().storage_set(), None))
        }
        StorageBackend::Postgres => {
            let pg = config.storage.postgres.clone().unwrap_or_default();
            let store = Arc::new(PostgresPermissionStore::connect(&pg.to_postgres_config()).await?);
            tracing::info!("Using PostgreSQL storage");
            Ok((StorageSet::from_shared(store.clone()), Some(store)))
        }
    }
}

/// Create the cache backend.
///
/// - **Redis disabled**: in-process cache only
/// - **Redis enabled, fallback on**: Redis behind a failover orchestrator with
///   the in-process cache as secondary
/// - **Redis enabled, fallback off**: Redis alone
async fn build_cache_backend(config: &AppConfig) -> Result<DynCacheBackend, StartupError> {
    let local = || -> DynCacheBackend {
        Arc::new(MemoryCache::with_sweep_interval(config.cache.sweep_interval()))
    };

    if !config.redis.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return Ok(local());
    }

    tracing::info!(url = %config.redis.url, "Connecting to Redis");

    let redis: DynCacheBackend = match RedisCache::connect(&config.redis.to_cache_config()) {
        Ok(redis) => Arc::new(redis),
        Err(e) if config.cache.fallback_enabled => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return Ok(local());
        }
        Err(e) => return Err(e.into()),
    };

    if config.cache.fallback_enabled {
        let failover =
            FailoverCache::new(redis, local(), config.cache.failover_config()).await;
        Ok(Arc::new(failover))
    } else {
        Ok(redis)
    }
}
