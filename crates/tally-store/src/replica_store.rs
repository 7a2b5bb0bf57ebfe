//! A backend paired with row locks.

use crate::entry::{Entry, StoreStats};
use crate::error::{Result, StoreError};
use crate::locks::{RowGuard, RowLocks};
use crate::memory::MemoryStore;
use crate::traits::EntryStore;
use std::sync::Arc;
use std::time::Duration;
use tally_core::{GCounter, ItemId, ReplicaId};

/// Shared handle to a replica's storage.
///
/// Local increments go through [`get_for_update`](ReplicaStore::get_for_update)
/// and [`write_locked`](ReplicaStore::write_locked), which only accept a
/// [`RowGuard`] for the row being written. The async methods run backend
/// calls on tokio's blocking pool; the sync ones call the backend directly.
pub struct ReplicaStore {
    backend: Arc<dyn EntryStore>,
    locks: RowLocks,
}

impl ReplicaStore {
    pub fn new(backend: Arc<dyn EntryStore>, lock_timeout: Duration) -> Self {
        Self {
            backend,
            locks: RowLocks::new(lock_timeout),
        }
    }

    /// In-memory store, for tests and simulations.
    pub fn in_memory(lock_timeout: Duration) -> Self {
        Self::new(Arc::new(MemoryStore::new()), lock_timeout)
    }

    pub fn backend(&self) -> &Arc<dyn EntryStore> {
        &self.backend
    }

    pub fn lock_timeout(&self) -> Duration {
        self.locks.timeout()
    }

    /// Lock the row and read its current entry.
    ///
    /// The lock is held until the returned guard is dropped.
    pub async fn get_for_update(
        &self,
        item_id: ItemId,
        replica_id: &ReplicaId,
    ) -> Result<(RowGuard, Option<Entry>)> {
        let guard = self.locks.acquire(item_id, replica_id).await?;
        let replica = replica_id.clone();
        let entry = self
            .blocking(move |backend| backend.get(item_id, &replica))
            .await?;
        Ok((guard, entry))
    }

    /// Write the row owned by `guard`.
    pub async fn write_locked(&self, guard: &RowGuard, count: u64) -> Result<()> {
        let (item_id, replica) = (guard.item_id(), guard.replica_id().clone());
        self.blocking(move |backend| backend.upsert(item_id, &replica, count))
            .await
    }

    /// [`merge_max`](Self::merge_max) off the async worker threads.
    pub async fn merge_remote(&self, item_id: ItemId, replica_id: &ReplicaId, count: u64) -> Result<bool> {
        let replica = replica_id.clone();
        self.blocking(move |backend| backend.merge_max(item_id, &replica, count))
            .await
    }

    /// Run `op` against the backend on the blocking pool.
    async fn blocking<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&dyn EntryStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        match tokio::task::spawn_blocking(move || op(backend.as_ref())).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(StoreError::Worker(err.to_string())),
        }
    }

    pub fn ensure_namespace(&self, replica_id: &ReplicaId) -> Result<bool> {
        self.backend.ensure_namespace(replica_id)
    }

    pub fn namespaces(&self) -> Result<Vec<ReplicaId>> {
        self.backend.namespaces()
    }

    pub fn get(&self, item_id: ItemId, replica_id: &ReplicaId) -> Result<Option<Entry>> {
        self.backend.get(item_id, replica_id)
    }

    pub fn get_all(&self, item_id: ItemId, replica_ids: &[ReplicaId]) -> Result<Vec<Entry>> {
        self.backend.get_all(item_id, replica_ids)
    }

    pub fn merge_max(&self, item_id: ItemId, replica_id: &ReplicaId, count: u64) -> Result<bool> {
        self.backend.merge_max(item_id, replica_id, count)
    }

    pub fn counter(&self, item_id: ItemId, replica_ids: &[ReplicaId]) -> Result<GCounter> {
        self.backend.counter(item_id, replica_ids)
    }

    pub fn item_ids(&self) -> Result<Vec<ItemId>> {
        self.backend.item_ids()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.backend.stats()
    }
}
