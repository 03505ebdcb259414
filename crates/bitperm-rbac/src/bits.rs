//! Bit allocation and aggregation.

use std::collections::BTreeMap;

use bitperm_storage::{RolePermission, SpaceId};

/// A space holds at most one permission per bit of a `u64`.
pub const MAX_PERMISSIONS_PER_SPACE: usize = 64;

/// Effective bitmask per space for one user.
pub type SpacePermissions = BTreeMap<SpaceId, u64>;

/// Value of the permission at `position`.
///
/// # Panics
///
/// Panics in debug builds if `position >= 64`.
#[inline]
pub fn bit_value(position: u8) -> u64 {
    debug_assert!((position as usize) < MAX_PERMISSIONS_PER_SPACE);
    1u64 << position
}

/// Next free position after `max`, or `None` once the space is full.
///
/// Positions only grow; a soft-deleted permission keeps its bit.
#[inline]
pub fn next_position(max: Option<u8>) -> Option<u8> {
    match max {
        None => Some(0),
        Some(p) if (p as usize) + 1 < MAX_PERMISSIONS_PER_SPACE => Some(p + 1),
        Some(_) => None,
    }
}

/// `true` if every bit of `value` is set in `mask`.
#[inline]
pub fn has_bits(mask: u64, value: u64) -> bool {
    mask & value == value
}

/// OR every link value into its space.
pub fn aggregate<'a>(links: impl IntoIterator<Item = &'a RolePermission>) -> SpacePermissions {
    let mut spaces = SpacePermissions::new();
    for link in links {
        *spaces.entry(link.space_id).or_insert(0) |= link.value;
    }
    spaces
}
