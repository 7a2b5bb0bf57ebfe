use serde::{Deserialize, Serialize};
use tally_core::{ItemId, ReplicaId};

/// One persisted sub-count: how many views `replica_id` recorded for `item_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub item_id: ItemId,
    pub replica_id: ReplicaId,
    pub count: u64,
}

impl Entry {
    pub fn new(item_id: ItemId, replica_id: ReplicaId, count: u64) -> Self {
        Self {
            item_id,
            replica_id,
            count,
        }
    }
}

/// Summary of what a store holds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of replica namespaces.
    pub namespaces: usize,
    /// Number of distinct items with at least one entry.
    pub items: usize,
    /// Total number of entries across all namespaces.
    pub entries: usize,
}
