//! Per-entity async mutual exclusion.
//!
//! Control-plane decisions for a single Task or Job run one at a time; decisions
//! for different entities proceed concurrently.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct KeyedLock {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. The guard releases on drop.
    pub async fn acquire(&self, key: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Forget the lock for a deleted entity. Holders keep their guard.
    pub fn remove(&self, key: &Uuid) {
        self.locks.remove(key);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
