//! Per-row exclusive locks with bounded acquisition.
//!
//! A row is identified by `(item_id, replica_id)` and may not exist in the
//! backend yet; the lock covers the "absent" slot too, so two callers racing
//! to create the same entry are serialized as well.

use crate::error::{Result, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tally_core::{ItemId, ReplicaId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type RowKey = (ItemId, ReplicaId);
type RowTable = Mutex<HashMap<RowKey, Arc<AsyncMutex<()>>>>;

/// Table of row mutexes, created on demand and dropped once nobody holds
/// or waits on them.
#[derive(Debug)]
pub struct RowLocks {
    rows: Arc<RowTable>,
    timeout: Duration,
}

/// Proof that the holder owns the row lock for `(item_id, replica_id)`.
/// Released on drop.
#[derive(Debug)]
pub struct RowGuard {
    item_id: ItemId,
    replica_id: ReplicaId,
    rows: Arc<RowTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RowGuard {
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut rows = self.rows.lock();
        let key = (self.item_id, self.replica_id.clone());
        // The table's own reference is the last one: no holder, no waiter.
        if rows.get(&key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
            rows.remove(&key);
        }
    }
}

impl RowLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            rows: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the row lock, failing with [`StoreError::LockTimeout`] once
    /// the configured timeout elapses.
    pub async fn acquire(&self, item_id: ItemId, replica_id: &ReplicaId) -> Result<RowGuard> {
        let mutex = {
            let mut rows = self.rows.lock();
            rows.entry((item_id, replica_id.clone()))
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(RowGuard {
                item_id,
                replica_id: replica_id.clone(),
                rows: Arc::clone(&self.rows),
                guard: Some(guard),
            }),
            Err(_) => Err(StoreError::LockTimeout {
                item_id,
                replica_id: replica_id.clone(),
                waited: self.timeout,
            }),
        }
    }

    /// Number of rows currently held or waited on.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
