//! Permission data model.
//!
//! Permissions inside a space are packed into the bits of a `u64`: each
//! permission owns one bit `position` and its `value` is `1 << position`.
//! Roles are linked to permissions and users are linked to roles; the
//! per-user cache row holds the OR of every value reachable from the user.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            #[inline]
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a user. Users themselves live outside this system.
    UserId
);
define_id!(
    /// Identifier of a role.
    RoleId
);
define_id!(
    /// Identifier of a permission space.
    SpaceId
);
define_id!(
    /// Identifier of a permission.
    PermissionId
);

// =============================================================================
// Space
// =============================================================================

/// Named container of at most 64 permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: SpaceId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Input for creating a space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSpace {
    pub name: String,
    pub description: Option<String>,
}

/// A space together with the number of permissions it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceWithCount {
    #[serde(flatten)]
    pub space: Space,
    /// Live (not soft-deleted) permissions in the space.
    pub permission_count: i64,
}

// =============================================================================
// Permission
// =============================================================================

/// A single bit inside a space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    /// Globally unique code such as `invoice.read`.
    pub code: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub space_id: SpaceId,
    /// Bit index, 0..=63, unique within the space and never reused.
    pub position: u8,
    /// Always `1 << position`.
    pub value: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub deleted_at: Option<OffsetDateTime>,
}

impl Permission {
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for creating a permission. Position and value are allocated by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPermission {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub space_id: SpaceId,
    pub position: u8,
    pub value: u64,
    pub module: Option<String>,
}

/// Partial update of a permission. Position and value are immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl PermissionUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.is_active.is_none()
    }
}

/// A permission together with the name of its space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDetail {
    #[serde(flatten)]
    pub permission: Permission,
    pub space_name: String,
}

// =============================================================================
// Role
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    /// System roles cannot be deleted.
    pub is_system: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_system: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// A role with the permissions linked to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDetail {
    #[serde(flatten)]
    pub role: Role,
    pub permission_codes: Vec<String>,
    pub permissions: Vec<PermissionDetail>,
}

// =============================================================================
// Links
// =============================================================================

/// Role to permission link. `space_id` and `value` are copied from the
/// permission when the link is created so aggregation needs no join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub space_id: SpaceId,
    pub value: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: UserId,
    pub role_id: RoleId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Permission cache row
// =============================================================================

/// Denormalized bitmask for one (user, space) pair. Derived state only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCacheEntry {
    pub user_id: UserId,
    pub space_id: SpaceId,
    pub permission_value: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PermissionCacheEntry {
    #[inline]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&UserId(42)).unwrap();
        assert_eq!(json, "42");
        let id: RoleId = serde_json::from_str("7").unwrap();
        assert_eq!(id, RoleId(7));
        assert_eq!(SpaceId::from(3).to_string(), "3");
    }

    #[test]
    fn test_cache_entry_expiry() {
        let now = OffsetDateTime::now_utc();
        let entry = PermissionCacheEntry {
            user_id: UserId(1),
            space_id: SpaceId(1),
            permission_value: 3,
            expires_at: now,
            updated_at: now,
        };
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - time::Duration::seconds(1)));
    }

    #[test]
    fn test_permission_update_is_empty() {
        assert!(PermissionUpdate::default().is_empty());
        assert!(
            !PermissionUpdate {
                is_active: Some(false),
                ..Default::default()
            }
            .is_empty()
        );
    }
}
