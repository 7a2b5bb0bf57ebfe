//! In-memory backend for tests and simulations.

use crate::entry::{Entry, StoreStats};
use crate::error::{Result, StoreError};
use crate::traits::EntryStore;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use tally_core::{ItemId, ReplicaId, MAX_COUNT};

type Namespace = BTreeMap<ItemId, u64>;

/// Entries held in per-replica maps behind a single `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<BTreeMap<ReplicaId, Namespace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same range as the SQLite backend.
    fn check_count(count: u64) -> Result<()> {
        if count > MAX_COUNT {
            return Err(StoreError::CountOverflow(count));
        }
        Ok(())
    }
}

impl EntryStore for MemoryStore {
    fn ensure_namespace(&self, replica_id: &ReplicaId) -> Result<bool> {
        let mut namespaces = self.namespaces.write();
        if namespaces.contains_key(replica_id) {
            return Ok(false);
        }
        namespaces.insert(replica_id.clone(), Namespace::new());
        Ok(true)
    }

    fn has_namespace(&self, replica_id: &ReplicaId) -> Result<bool> {
        Ok(self.namespaces.read().contains_key(replica_id))
    }

    fn namespaces(&self) -> Result<Vec<ReplicaId>> {
        Ok(self.namespaces.read().keys().cloned().collect())
    }

    fn get(&self, item_id: ItemId, replica_id: &ReplicaId) -> Result<Option<Entry>> {
        let namespaces = self.namespaces.read();
        Ok(namespaces
            .get(replica_id)
            .and_then(|ns| ns.get(&item_id))
            .map(|count| Entry::new(item_id, replica_id.clone(), *count)))
    }

    fn get_all(&self, item_id: ItemId, replica_ids: &[ReplicaId]) -> Result<Vec<Entry>> {
        let namespaces = self.namespaces.read();
        let wanted: BTreeSet<&ReplicaId> = replica_ids.iter().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|replica_id| {
                namespaces
                    .get(replica_id)
                    .and_then(|ns| ns.get(&item_id))
                    .map(|count| Entry::new(item_id, replica_id.clone(), *count))
            })
            .collect())
    }

    fn upsert(&self, item_id: ItemId, replica_id: &ReplicaId, count: u64) -> Result<()> {
        Self::check_count(count)?;
        self.namespaces
            .write()
            .entry(replica_id.clone())
            .or_default()
            .insert(item_id, count);
        Ok(())
    }

    fn merge_max(&self, item_id: ItemId, replica_id: &ReplicaId, count: u64) -> Result<bool> {
        if count == 0 {
            return Ok(false);
        }
        Self::check_count(count)?;
        let mut namespaces = self.namespaces.write();
        let stored = namespaces
            .entry(replica_id.clone())
            .or_default()
            .entry(item_id)
            .or_insert(0);
        if count > *stored {
            *stored = count;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn item_ids(&self) -> Result<Vec<ItemId>> {
        let namespaces = self.namespaces.read();
        let items: BTreeSet<ItemId> = namespaces
            .values()
            .flat_map(|ns| ns.keys().copied())
            .collect();
        Ok(items.into_iter().collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let namespaces = self.namespaces.read();
        let items: BTreeSet<ItemId> = namespaces
            .values()
            .flat_map(|ns| ns.keys().copied())
            .collect();
        Ok(StoreStats {
            namespaces: namespaces.len(),
            items: items.len(),
            entries: namespaces.values().map(|ns| ns.len()).sum(),
        })
    }
}
