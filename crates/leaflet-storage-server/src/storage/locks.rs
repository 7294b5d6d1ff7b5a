//! Per-datalayer write locks
//!
//! Saving a datalayer reads the current file, checks `If-Match` against it and
//! writes a new version. Holding the datalayer's lock across those steps keeps
//! two concurrent saves from both passing the check.

use dashmap::DashMap;
use leaflet_storage_core::DataLayerId;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct DataLayerLocks {
    locks: DashMap<DataLayerId, Arc<Mutex<()>>>,
}

impl DataLayerLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Wait for exclusive access to a datalayer's files.
    pub async fn acquire(&self, id: DataLayerId) -> OwnedMutexGuard<()> {
        // Clone the Arc so the map shard is not held across the await
        let lock = self.locks.entry(id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted datalayer.
    pub fn forget(&self, id: DataLayerId) {
        self.locks.remove(&id);
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

impl Default for DataLayerLocks {
    fn default() -> Self {
        Self::new()
    }
}
