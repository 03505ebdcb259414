use bitperm_cache::HealthStatus;
use bitperm_rbac::PermissionRequest;
use bitperm_server::{AppConfig, AppContainer, CacheStrategy, ServiceHealth};
use bitperm_storage::UserId;

async fn grant_and_check(container: &AppContainer) {
    let space = container
        .manager
        .create_space("billing", Some("Invoices"))
        .await
        .unwrap();
    for code in ["invoice.read", "invoice.write"] {
        container
            .manager
            .create_permission(PermissionRequest {
                code: code.into(),
                name: code.into(),
                description: None,
                space_id: space.id,
                module: Some("billing".into()),
            })
            .await
            .unwrap();
    }
    let viewer = container
        .manager
        .create_role("viewer", None, &["invoice.read".to_string()])
        .await
        .unwrap();
    container
        .manager
        .assign_role_to_user(UserId(1), viewer.id)
        .await
        .unwrap();

    assert!(container.checker.has_permission(UserId(1), "invoice.read").await.unwrap());
    assert!(!container.checker.has_permission(UserId(1), "invoice.write").await.unwrap());
}

#[tokio::test]
async fn memory_stack_with_table_strategy() {
    let container = AppContainer::build(AppConfig::default()).await.unwrap();
    grant_and_check(&container).await;

    let health = ServiceHealth::collect(&container).await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.storage_ok);
    assert_eq!(health.strategy, "table");
    assert_eq!(health.permission_cache.hits, 1);

    container.shutdown().await;
}

#[tokio::test]
async fn memory_stack_with_backend_strategy() {
    let mut config = AppConfig::default();
    config.permissions.strategy = CacheStrategy::Backend;
    config.rate_limit.limit = 2;
    config.rate_limit.window_secs = 3600;

    let container = AppContainer::build(config).await.unwrap();
    grant_and_check(&container).await;

    assert!(container.rate_limiter.check("client-a").await.allowed);
    assert!(container.rate_limiter.check("client-a").await.allowed);
    assert!(!container.rate_limiter.check("client-a").await.allowed);

    let health = ServiceHealth::collect(&container).await;
    assert_eq!(health.strategy, "backend");

    container.shutdown().await;
}

#[tokio::test]
async fn unreachable_redis_degrades_to_local_cache() {
    let mut config = AppConfig::default();
    config.redis.enabled = true;
    config.redis.url = "redis://127.0.0.1:1".into();
    config.redis.timeout_ms = 500;
    config.cache.ping_timeout_ms = 500;
    config.permissions.strategy = CacheStrategy::Backend;

    let container = AppContainer::build(config).await.unwrap();
    assert!(container.cache_backend.is_degraded());

    grant_and_check(&container).await;

    let health = ServiceHealth::collect(&container).await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(health.cache.is_degraded);

    container.shutdown().await;
}
