//! End-to-end registry and evaluator behaviour over the in-memory store,
//! run against both cache strategies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitperm_cache::{CacheBackend, MemoryCache};
use bitperm_db_memory::InMemoryPermissionStore;
use bitperm_rbac::{
    BackendPermissionCache, ErrorCategory, MAX_PERMISSIONS_PER_SPACE, PermissionCache,
    PermissionChecker, PermissionManager, PermissionRequest, RbacError, TablePermissionCache,
    UserLocks,
};
use bitperm_storage::{
    NewRole, Role, RoleId, SpaceId, StorageResult, StorageSet, UserId, UserRole, UserRoleStorage,
};

#[derive(Debug, Clone, Copy)]
enum Strategy {
    Table,
    Backend,
}

const STRATEGIES: [Strategy; 2] = [Strategy::Table, Strategy::Backend];

struct Harness {
    storage: StorageSet,
    manager: Arc<PermissionManager>,
    checker: Arc<PermissionChecker>,
    backend: Option<Arc<MemoryCache>>,
}

fn harness(strategy: Strategy) -> Harness {
    let storage = InMemoryPermissionStore::new().storage_set();
    let ttl = Duration::from_secs(300);

    let (cache, backend) = match strategy {
        Strategy::Table => {
            let cache: Arc<dyn PermissionCache> = Arc::new(TablePermissionCache::new(
                storage.permission_cache.clone(),
                ttl,
            ));
            (cache, None)
        }
        Strategy::Backend => {
            let backend = Arc::new(MemoryCache::new());
            let cache: Arc<dyn PermissionCache> =
                Arc::new(BackendPermissionCache::new(backend.clone(), ttl));
            (cache, Some(backend))
        }
    };

    let locks = Arc::new(UserLocks::new());
    Harness {
        manager: Arc::new(PermissionManager::new(
            storage.clone(),
            cache.clone(),
            locks.clone(),
        )),
        checker: Arc::new(PermissionChecker::new(storage.clone(), cache, locks)),
        storage,
        backend,
    }
}

fn request(code: &str, space_id: SpaceId) -> PermissionRequest {
    PermissionRequest {
        code: code.to_string(),
        name: code.to_string(),
        description: None,
        space_id,
        module: None,
    }
}

fn codes(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

#[tokio::test]
async fn billing_viewer_reads_but_cannot_write() {
    for strategy in STRATEGIES {
        let h = harness(strategy);
        let billing = h.manager.create_space("billing", None).await.unwrap();
        let read = h
            .manager
            .create_permission(request("invoice.read", billing.id))
            .await
            .unwrap();
        let write = h
            .manager
            .create_permission(request("invoice.write", billing.id))
            .await
            .unwrap();
        assert_eq!((read.value, write.value), (1, 2));

        let viewer = h
            .manager
            .create_role("viewer", None, &codes(&["invoice.read"]))
            .await
            .unwrap();
        let user = UserId(42);
        h.manager.assign_role_to_user(user, viewer.id).await.unwrap();

        assert!(h.checker.has_permission(user, "invoice.read").await.unwrap(), "{strategy:?}");
        assert!(!h.checker.has_permission(user, "invoice.write").await.unwrap(), "{strategy:?}");

        let cached = h.checker.cached_permissions(user).await.unwrap().unwrap();
        assert_eq!(cached.get(&billing.id), Some(&1), "{strategy:?}");

        let stats = h.checker.cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 1), "{strategy:?}");
    }
}

#[tokio::test]
async fn space_holds_exactly_64_distinct_bits() {
    let h = harness(Strategy::Table);
    let space = h.manager.create_space("wide", None).await.unwrap();

    let mut seen = 0u64;
    for i in 0..MAX_PERMISSIONS_PER_SPACE {
        let permission = h
            .manager
            .create_permission(request(&format!("wide.p{i}"), space.id))
            .await
            .unwrap();
        assert!(permission.value.is_power_of_two());
        assert_eq!(seen & permission.value, 0, "bit handed out twice");
        seen |= permission.value;
    }
    assert_eq!(seen, u64::MAX);

    let err = h
        .manager
        .create_permission(request("wide.p64", space.id))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Capacity);
    assert!(!h.storage.permissions.code_exists("wide.p64").await.unwrap());
    assert_eq!(
        h.manager.list_permissions(Some(space.id)).await.unwrap().len(),
        MAX_PERMISSIONS_PER_SPACE
    );

    let spaces = h.manager.list_spaces().await.unwrap();
    assert_eq!(spaces[0].permission_count, 64);
}

/// Role assignments that list a user's roles newest first.
struct ReversedRoles(Arc<dyn UserRoleStorage>);

#[async_trait]
impl UserRoleStorage for ReversedRoles {
    async fn assign(&self, user_id: UserId, role_id: RoleId) -> StorageResult<UserRole> {
        self.0.assign(user_id, role_id).await
    }

    async fn remove(&self, user_id: UserId, role_id: RoleId) -> StorageResult<()> {
        self.0.remove(user_id, role_id).await
    }

    async fn exists(&self, user_id: UserId, role_id: RoleId) -> StorageResult<bool> {
        self.0.exists(user_id, role_id).await
    }

    async fn roles_for_user(&self, user_id: UserId) -> StorageResult<Vec<Role>> {
        let mut roles = self.0.roles_for_user(user_id).await?;
        roles.reverse();
        Ok(roles)
    }

    async fn user_ids_for_role(&self, role_id: RoleId) -> StorageResult<Vec<UserId>> {
        self.0.user_ids_for_role(role_id).await
    }

    async fn delete_for_role(&self, role_id: RoleId) -> StorageResult<u64> {
        self.0.delete_for_role(role_id).await
    }
}

#[tokio::test]
async fn aggregation_ignores_role_order() {
    let h = harness(Strategy::Table);
    let docs = h.manager.create_space("docs", None).await.unwrap();
    let billing = h.manager.create_space("billing", None).await.unwrap();
    for code in ["doc.read", "doc.write", "doc.share"] {
        h.manager.create_permission(request(code, docs.id)).await.unwrap();
    }
    h.manager
        .create_permission(request("invoice.read", billing.id))
        .await
        .unwrap();

    let a = h
        .manager
        .create_role("a", None, &codes(&["doc.read", "invoice.read"]))
        .await
        .unwrap();
    let b = h
        .manager
        .create_role("b", None, &codes(&["doc.share"]))
        .await
        .unwrap();
    let user = UserId(1);
    h.manager.assign_role_to_user(user, a.id).await.unwrap();
    h.manager.assign_role_to_user(user, b.id).await.unwrap();

    let mut reversed = h.storage.clone();
    reversed.user_roles = Arc::new(ReversedRoles(h.storage.user_roles.clone()));

    let forward_ids: Vec<RoleId> = h
        .storage
        .user_roles
        .roles_for_user(user)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    let reversed_ids: Vec<RoleId> = reversed
        .user_roles
        .roles_for_user(user)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(forward_ids, vec![a.id, b.id]);
    assert_eq!(reversed_ids, vec![b.id, a.id]);

    let reversed_checker = PermissionChecker::new(
        reversed.clone(),
        Arc::new(TablePermissionCache::new(
            reversed.permission_cache.clone(),
            Duration::from_secs(300),
        )),
        Arc::new(UserLocks::new()),
    );

    let forward = h.checker.calculate_user_permissions(user).await.unwrap();
    let backward = reversed_checker.calculate_user_permissions(user).await.unwrap();
    assert_eq!(forward, backward);
    assert_eq!(forward[&docs.id], 0b101);
    assert_eq!(forward[&billing.id], 0b1);
}

#[tokio::test]
async fn granting_to_a_held_role_takes_effect() {
    for strategy in STRATEGIES {
        let h = harness(strategy);
        let docs = h.manager.create_space("docs", None).await.unwrap();
        h.manager.create_permission(request("doc.read", docs.id)).await.unwrap();
        h.manager.create_permission(request("doc.write", docs.id)).await.unwrap();
        let role = h
            .manager
            .create_role("editor", None, &codes(&["doc.read"]))
            .await
            .unwrap();
        let user = UserId(7);

        h.manager.assign_role_to_user(user, role.id).await.unwrap();
        assert!(!h.checker.has_permission(user, "doc.write").await.unwrap());

        h.manager.add_permission_to_role(role.id, "doc.write").await.unwrap();
        assert!(h.checker.has_permission(user, "doc.write").await.unwrap(), "{strategy:?}");

        h.manager
            .remove_permission_from_role(role.id, "doc.write")
            .await
            .unwrap();
        assert!(!h.checker.has_permission(user, "doc.write").await.unwrap(), "{strategy:?}");

        h.manager.remove_role_from_user(user, role.id).await.unwrap();
        assert!(!h.checker.has_permission(user, "doc.read").await.unwrap(), "{strategy:?}");
    }
}

#[tokio::test]
async fn system_role_cannot_be_deleted() {
    for strategy in STRATEGIES {
        let h = harness(strategy);
        let docs = h.manager.create_space("docs", None).await.unwrap();
        h.manager.create_permission(request("doc.read", docs.id)).await.unwrap();

        let admin = h
            .storage
            .roles
            .create(&NewRole {
                name: "admin".into(),
                description: None,
                is_system: true,
            })
            .await
            .unwrap();
        h.manager.add_permission_to_role(admin.id, "doc.read").await.unwrap();
        h.manager.assign_role_to_user(UserId(1), admin.id).await.unwrap();
        assert!(h.checker.has_permission(UserId(1), "doc.read").await.unwrap());
        let cached_before = h.checker.cached_permissions(UserId(1)).await.unwrap();

        let err = h.manager.delete_role(admin.id).await.unwrap_err();
        assert!(matches!(err, RbacError::SystemRole { .. }));
        assert_eq!(err.category(), ErrorCategory::InvariantViolation);

        assert_eq!(
            h.manager.role_permission_codes(admin.id).await.unwrap(),
            vec!["doc.read"]
        );
        assert_eq!(h.manager.user_roles(UserId(1)).await.unwrap().len(), 1);
        assert_eq!(
            h.checker.cached_permissions(UserId(1)).await.unwrap(),
            cached_before,
            "{strategy:?}"
        );
    }
}

#[tokio::test]
async fn deleting_a_role_revokes_its_holders() {
    for strategy in STRATEGIES {
        let h = harness(strategy);
        let docs = h.manager.create_space("docs", None).await.unwrap();
        h.manager.create_permission(request("doc.read", docs.id)).await.unwrap();
        let role = h
            .manager
            .create_role("reader", None, &codes(&["doc.read"]))
            .await
            .unwrap();
        for user in [UserId(1), UserId(2)] {
            h.manager.assign_role_to_user(user, role.id).await.unwrap();
            assert!(h.checker.has_permission(user, "doc.read").await.unwrap());
        }

        h.manager.delete_role(role.id).await.unwrap();

        for user in [UserId(1), UserId(2)] {
            assert_eq!(h.checker.cached_permissions(user).await.unwrap(), None);
            assert!(!h.checker.has_permission(user, "doc.read").await.unwrap(), "{strategy:?}");
        }
    }
}

#[tokio::test]
async fn deleted_permission_is_never_granted() {
    let h = harness(Strategy::Backend);
    let docs = h.manager.create_space("docs", None).await.unwrap();
    let permission = h
        .manager
        .create_permission(request("doc.read", docs.id))
        .await
        .unwrap();
    let role = h
        .manager
        .create_role("reader", None, &codes(&["doc.read"]))
        .await
        .unwrap();
    h.manager.assign_role_to_user(UserId(1), role.id).await.unwrap();
    assert!(h.checker.has_permission(UserId(1), "doc.read").await.unwrap());

    h.manager.delete_permission(permission.id).await.unwrap();

    assert!(!h.checker.has_permission(UserId(1), "doc.read").await.unwrap());
    assert!(h.checker.user_permission_codes(UserId(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn backend_outage_still_answers_from_storage() {
    let h = harness(Strategy::Backend);
    let docs = h.manager.create_space("docs", None).await.unwrap();
    h.manager.create_permission(request("doc.read", docs.id)).await.unwrap();
    let role = h
        .manager
        .create_role("reader", None, &codes(&["doc.read"]))
        .await
        .unwrap();

    let backend = h.backend.clone().unwrap();
    backend.close().await;

    // Invalidation after the assignment fails silently.
    h.manager.assign_role_to_user(UserId(3), role.id).await.unwrap();

    assert_eq!(
        h.checker
            .check_permission_with_cache(UserId(3), "doc.read")
            .await
            .unwrap(),
        (true, false)
    );
    assert_eq!(
        h.checker.user_permission_codes(UserId(3)).await.unwrap(),
        vec!["doc.read"]
    );
    assert!(h.manager.clear_user_cache(UserId(3)).await.unwrap_err().is_cache_unavailable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recompute_racing_a_grant_leaves_no_stale_mask() {
    for strategy in STRATEGIES {
        let h = harness(strategy);
        let docs = h.manager.create_space("docs", None).await.unwrap();
        h.manager.create_permission(request("doc.read", docs.id)).await.unwrap();
        let write = h
            .manager
            .create_permission(request("doc.write", docs.id))
            .await
            .unwrap();
        let role = h
            .manager
            .create_role("editor", None, &codes(&["doc.read"]))
            .await
            .unwrap();
        let user = UserId(11);
        h.manager.assign_role_to_user(user, role.id).await.unwrap();

        let mut readers = Vec::new();
        for _ in 0..8 {
            let checker = h.checker.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..25 {
                    checker.calculate_user_permissions(user).await.unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }

        tokio::task::yield_now().await;
        h.manager.add_permission_to_role(role.id, "doc.write").await.unwrap();

        for reader in readers {
            reader.await.unwrap();
        }

        if let Some(cached) = h.checker.cached_permissions(user).await.unwrap() {
            let mask = cached.get(&docs.id).copied().unwrap_or_default();
            assert_eq!(mask & write.value, write.value, "{strategy:?}: stale mask {mask:#b}");
        }
        assert!(h.checker.has_permission(user, "doc.write").await.unwrap());
    }
}

#[tokio::test]
async fn table_strategy_purges_expired_rows() {
    let storage = InMemoryPermissionStore::new().storage_set();
    let cache = Arc::new(TablePermissionCache::new(
        storage.permission_cache.clone(),
        Duration::ZERO,
    ));
    let locks = Arc::new(UserLocks::new());
    let manager = PermissionManager::new(storage.clone(), cache.clone(), locks.clone());
    let checker = PermissionChecker::new(storage.clone(), cache.clone(), locks);

    let docs = manager.create_space("docs", None).await.unwrap();
    manager.create_permission(request("doc.read", docs.id)).await.unwrap();
    let role = manager
        .create_role("reader", None, &codes(&["doc.read"]))
        .await
        .unwrap();
    manager.assign_role_to_user(UserId(1), role.id).await.unwrap();

    assert_eq!(
        checker
            .check_permission_with_cache(UserId(1), "doc.read")
            .await
            .unwrap(),
        (true, false)
    );
    // Rows expire immediately, so the second check misses as well.
    assert_eq!(
        checker
            .check_permission_with_cache(UserId(1), "doc.read")
            .await
            .unwrap(),
        (true, false)
    );

    assert_eq!(cache.purge_expired().await.unwrap(), 1);
    assert!(storage.permission_cache.find_for_user(UserId(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn backend_keys_are_scoped_per_user() {
    let h = harness(Strategy::Backend);
    let docs = h.manager.create_space("docs", None).await.unwrap();
    h.manager.create_permission(request("doc.read", docs.id)).await.unwrap();
    let role = h
        .manager
        .create_role("reader", None, &codes(&["doc.read"]))
        .await
        .unwrap();
    h.manager.assign_role_to_user(UserId(1), role.id).await.unwrap();
    h.manager.assign_role_to_user(UserId(10), role.id).await.unwrap();
    h.checker.refresh_user_cache(UserId(1)).await.unwrap();
    h.checker.refresh_user_cache(UserId(10)).await.unwrap();

    let backend = h.backend.clone().unwrap();
    let key = format!("perm:user:1:space:{}", docs.id);
    assert_eq!(backend.get(&key).await.unwrap(), Some(b"1".to_vec()));

    h.checker.invalidate_user_cache(UserId(1)).await.unwrap();
    assert!(!backend.exists(&key).await.unwrap());
    assert!(
        backend
            .exists(&format!("perm:user:10:space:{}", docs.id))
            .await
            .unwrap()
    );
}
