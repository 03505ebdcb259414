//! In-memory storage backend for BitPerm.
//!
//! Implements every storage trait from `bitperm-storage` over in-process
//! tables guarded by a single `tokio::sync::RwLock`, which keeps multi-table
//! checks (uniqueness, link existence) atomic.
//!
//! # Example
//!
//! ```ignore
//! use bitperm_db_memory::InMemoryPermissionStore;
//!
//! let storage = InMemoryPermissionStore::new().storage_set();
//! let space = storage.spaces.create(&NewSpace { name: "billing".into(), description: None }).await?;
//! ```

pub mod store;

pub use store::InMemoryPermissionStore;

/// Creates a storage set backed by a fresh in-memory store.
pub fn create_storage_set() -> bitperm_storage::StorageSet {
    InMemoryPermissionStore::new().storage_set()
}
