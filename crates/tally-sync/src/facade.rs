//! The view counter that application code talks to.

use crate::error::{Result, TallyError};
use crate::network::PeerTransport;
use crate::service::SyncService;
use std::sync::Arc;
use tally_core::{GCounter, ItemId};
use tracing::debug;

/// Records views locally and reads converged totals.
pub struct ViewCounter<T: PeerTransport> {
    service: Arc<SyncService<T>>,
    push_enabled: bool,
}

impl<T: PeerTransport> ViewCounter<T> {
    pub fn new(service: Arc<SyncService<T>>, push_enabled: bool) -> Self {
        Self {
            service,
            push_enabled,
        }
    }

    pub fn service(&self) -> &Arc<SyncService<T>> {
        &self.service
    }

    pub fn push_enabled(&self) -> bool {
        self.push_enabled
    }

    /// Record a single view.
    pub async fn record_view(&self, item_id: ItemId) -> Result<u64> {
        self.record_views(item_id, 1).await
    }

    /// Add `amount` views to this replica's entry for `item_id`.
    ///
    /// Returns the replica's new sub-count once it is stored. Peers are
    /// notified in the background.
    pub async fn record_views(&self, item_id: ItemId, amount: i64) -> Result<u64> {
        if amount < 0 {
            return Err(TallyError::InvalidArgument(format!(
                "increment amount must be >= 0, got {amount}"
            )));
        }
        let local = self.service.local_id().clone();
        let store = self.service.store();

        let count = {
            let (guard, entry) = store.get_for_update(item_id, &local).await?;
            let mut counts = GCounter::new();
            if let Some(entry) = entry {
                counts.observe(entry.replica_id, entry.count);
            }
            let count = counts.increment(local.clone(), amount)?;
            store.write_locked(&guard, count).await?;
            count
        };
        debug!(replica = %local, item_id, count, "recorded views");

        if self.push_enabled {
            self.service.spawn_push(item_id);
        }
        Ok(count)
    }

    /// Pull from peers, then sum every known replica's entry.
    ///
    /// Unreachable peers only make the total staler; storage failures are
    /// returned.
    pub async fn total_views(&self, item_id: ItemId) -> Result<u64> {
        Ok(self.service.pull_and_merge(item_id).await?.total)
    }

    /// Per-replica counts for `item_id` as stored locally.
    pub fn breakdown(&self, item_id: ItemId) -> Result<GCounter> {
        self.service.local_counter(item_id)
    }

    /// Views recorded by this replica alone.
    pub fn local_views(&self, item_id: ItemId) -> Result<u64> {
        Ok(self.service.local_counts(item_id)?.value())
    }
}
