//! # bitperm-rbac
//!
//! Bit-packed role-based access control.
//!
//! Permissions are grouped into spaces of at most 64. Each permission owns one
//! bit of its space (`value = 1 << position`), so a user's effective rights in a
//! space are a single `u64`: the OR of the values linked to all of their roles.
//!
//! ## Components
//!
//! - [`PermissionManager`]: spaces, permissions, roles and assignments, with
//!   cache invalidation after every mutation that changes effective masks
//! - [`PermissionChecker`]: cache-then-compute permission checks
//! - [`PermissionCache`]: pluggable mask cache, either [`TablePermissionCache`]
//!   (rows in the persistent store) or [`BackendPermissionCache`] (keys in a
//!   [`CacheBackend`](bitperm_cache::CacheBackend))
//! - [`UserLocks`]: per-user lock shared by the checker and the manager
//!
//! ## Example
//!
//! ```ignore
//! let locks = Arc::new(UserLocks::new());
//! let cache: Arc<dyn PermissionCache> =
//!     Arc::new(BackendPermissionCache::new(backend, DEFAULT_PERMISSION_TTL));
//! let manager = PermissionManager::new(storage.clone(), cache.clone(), locks.clone());
//! let checker = PermissionChecker::new(storage, cache, locks);
//!
//! let space = manager.create_space("billing", None).await?;
//! manager.create_permission(PermissionRequest { code: "invoice.read".into(), .. }).await?;
//! let role = manager.create_role("viewer", None, &["invoice.read".into()]).await?;
//! manager.assign_role_to_user(user_id, role.id).await?;
//!
//! assert!(checker.has_permission(user_id, "invoice.read").await?);
//! ```

pub mod bits;
pub mod cache;
pub mod checker;
pub mod error;
pub mod locks;
pub mod manager;

pub use bits::{MAX_PERMISSIONS_PER_SPACE, SpacePermissions, bit_value, has_bits};
pub use cache::{
    BackendPermissionCache, DEFAULT_PERMISSION_TTL, PermissionCache, PermissionCacheStats,
    TablePermissionCache,
};
pub use checker::PermissionChecker;
pub use error::{ErrorCategory, RbacError, RbacResult};
pub use locks::UserLocks;
pub use manager::{PermissionManager, PermissionRequest};
