//! # bitperm-storage
//!
//! Data model and storage traits for the BitPerm permission engine.
//!
//! The model covers permission spaces, bit-packed permissions, roles, the
//! role-permission and user-role links, and the derived per-user cache row.
//! Storage is split into one async trait per table and bundled as a
//! [`StorageSet`] for the engine.

pub mod error;
pub mod model;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use model::{
    NewPermission, NewRole, NewSpace, Permission, PermissionCacheEntry, PermissionDetail,
    PermissionId, PermissionUpdate, Role, RoleDetail, RoleId, RolePermission, RoleUpdate, Space,
    SpaceId, SpaceWithCount, UserId, UserRole,
};
pub use traits::{
    PermissionCacheStorage, PermissionStorage, RolePermissionStorage, RoleStorage, SpaceStorage,
    StorageSet, UserRoleStorage,
};
