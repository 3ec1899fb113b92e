//! Per-key mutual exclusion.
//!
//! Walk transitions for one walker are serialized; different walkers run
//! concurrently.  Each key maps to a `Semaphore(1)` and the permit is held
//! for the whole transition, including its fanout.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use st_domain::error::{Error, Result};

pub struct KeyLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for KeyLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.  The lock releases when the
    /// permit is dropped.
    pub async fn acquire(&self, key: &str) -> Result<OwnedSemaphorePermit> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .map_err(|_| Error::Other(format!("lock for {key} closed")))
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    /// Drop entries nobody holds or waits on.  Held permits and in-flight
    /// `acquire` calls each keep a clone of the `Arc`.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| Arc::strong_count(sem) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_access() {
        let map = KeyLockMap::new();
        drop(map.acquire("w1").await.unwrap());
        drop(map.acquire("w1").await.unwrap());
    }

    #[tokio::test]
    async fn different_keys_concurrent() {
        let map = KeyLockMap::new();
        let p1 = map.acquire("w1").await.unwrap();
        let p2 = map.acquire("w2").await.unwrap();
        assert_eq!(map.len(), 2);
        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn same_key_waits() {
        let map = Arc::new(KeyLockMap::new());
        let map2 = map.clone();

        let p1 = map.acquire("w1").await.unwrap();
        let handle = tokio::spawn(async move {
            let _p2 = map2.acquire("w1").await.unwrap();
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        drop(p1);
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let map = KeyLockMap::new();
        let held = map.acquire("held").await.unwrap();
        drop(map.acquire("idle").await.unwrap());

        map.prune_idle();
        assert_eq!(map.len(), 1);
        drop(held);
        map.prune_idle();
        assert!(map.is_empty());
    }
}
