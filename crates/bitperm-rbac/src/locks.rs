//! Per-user recompute locks.
//!
//! The evaluator holds a user's lock from reading roles until the recomputed
//! mask is written; the registry takes the same lock before invalidating that
//! user after a committed mutation. A recompute that read pre-mutation data
//! therefore always finishes before the invalidation that removes it.

use std::sync::Arc;

use bitperm_storage::UserId;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hands out one async mutex per user.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, user_id: UserId) -> Arc<Mutex<()>> {
        self.locks.entry(user_id).or_default().clone()
    }

    /// Lock one user.
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        self.handle(user_id).lock_owned().await
    }

    /// Lock several users in ascending id order.
    pub async fn lock_many(&self, user_ids: &[UserId]) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = user_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock(id).await);
        }
        guards
    }

    /// Drop locks nobody holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_user_is_serialized() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.lock(UserId(1)).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(UserId(1)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_users_do_not_block() {
        let locks = UserLocks::new();
        let _a = locks.lock(UserId(1)).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(UserId(2))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_lock_many_dedups() {
        let locks = UserLocks::new();
        let guards = locks
            .lock_many(&[UserId(3), UserId(1), UserId(3)])
            .await;
        assert_eq!(guards.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = UserLocks::new();
        let held = locks.lock(UserId(1)).await;
        drop(locks.lock(UserId(2)).await);

        assert_eq!(locks.len(), 2);
        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }
}
