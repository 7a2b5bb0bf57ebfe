use crate::entry::{Entry, StoreStats};
use crate::error::Result;
use tally_core::{GCounter, ItemId, ReplicaId};

/// Core trait for per-replica entry persistence.
///
/// Storage is one logical table keyed by `(item_id, replica_id)` and
/// partitioned into a namespace per replica id. Writing to a replica id
/// that has no namespace yet creates it first.
///
/// Implementations must make every single-row write atomic. Row-level
/// exclusion for read-modify-write lives in [`ReplicaStore`](crate::ReplicaStore).
pub trait EntryStore: Send + Sync + 'static {
    /// Create the namespace for `replica_id` if missing.
    /// Returns `true` when this call created it.
    fn ensure_namespace(&self, replica_id: &ReplicaId) -> Result<bool>;

    /// Check whether `replica_id` has a namespace.
    fn has_namespace(&self, replica_id: &ReplicaId) -> Result<bool>;

    /// All replica ids that have a namespace.
    fn namespaces(&self) -> Result<Vec<ReplicaId>>;

    /// Read the entry for `(item_id, replica_id)`.
    fn get(&self, item_id: ItemId, replica_id: &ReplicaId) -> Result<Option<Entry>>;

    /// Read every stored entry for `item_id` belonging to one of `replica_ids`.
    fn get_all(&self, item_id: ItemId, replica_ids: &[ReplicaId]) -> Result<Vec<Entry>>;

    /// Create or overwrite the entry for `(item_id, replica_id)`.
    ///
    /// Callers are responsible for monotonicity; merges should use
    /// [`merge_max`](EntryStore::merge_max) instead.
    fn upsert(&self, item_id: ItemId, replica_id: &ReplicaId, count: u64) -> Result<()>;

    /// Write `count` only if it is strictly greater than the stored value
    /// (absent counts as zero). Returns `true` when the row changed.
    fn merge_max(&self, item_id: ItemId, replica_id: &ReplicaId, count: u64) -> Result<bool>;

    /// Every item id with at least one entry, in ascending order.
    fn item_ids(&self) -> Result<Vec<ItemId>>;

    /// Summary counts.
    fn stats(&self) -> Result<StoreStats>;

    /// Rebuild the counter for `item_id` from the entries of `replica_ids`.
    fn counter(&self, item_id: ItemId, replica_ids: &[ReplicaId]) -> Result<GCounter> {
        let entries = self.get_all(item_id, replica_ids)?;
        Ok(GCounter::from_counts(
            entries.into_iter().map(|e| (e.replica_id, e.count)),
        ))
    }
}
