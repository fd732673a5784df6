//! Per-owner locks serializing subnet mutations.
//!
//! Reconciles of the same SubnetSet never overlap, but the garbage collector
//! and finalizer-driven deletes can race with them. Every path that creates
//! or deletes NSX subnets of an owner holds the owner's lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lock registry keyed by owner CR UID
#[derive(Debug, Default)]
pub struct SubnetSetLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SubnetSetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the owner's lock. The guard releases it on drop.
    pub async fn acquire(&self, uid: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(uid.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the registry entry when nobody holds or waits for it.
    /// Returns whether the entry is gone.
    pub fn release(&self, uid: &str) -> bool {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        match locks.get(uid) {
            Some(lock) if Arc::strong_count(lock) == 1 => {
                locks.remove(uid);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_uid_is_serialized() {
        let locks = Arc::new(SubnetSetLocks::new());
        let guard = locks.acquire("uid-1").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("uid-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_uids_do_not_block() {
        let locks = SubnetSetLocks::new();
        let _a = locks.acquire("uid-1").await;
        let _b = locks.acquire("uid-2").await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_release_only_when_unused() {
        let locks = SubnetSetLocks::new();
        let guard = locks.acquire("uid-1").await;

        assert!(!locks.release("uid-1"));
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.release("uid-1"));
        assert!(locks.is_empty());
        assert!(locks.release("unknown"));
    }
}
