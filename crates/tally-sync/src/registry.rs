//! The set of known replicas and how to reach them.

use crate::config::{PeerConfig, ReplicaConfig};
use crate::network::PeerAddress;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tally_core::ReplicaId;
use tally_store::{ReplicaStore, Result as StoreResult};
use tracing::info;

/// Single source of truth for which replica ids exist.
///
/// Known ids come from configuration, from namespaces already present in
/// storage, and from replica ids observed in sync traffic. Ids are never
/// forgotten. Only configured peers have an address; discovered ids are
/// merged and counted but not contacted.
pub struct ReplicaRegistry {
    local: ReplicaId,
    peers: Vec<PeerConfig>,
    known: RwLock<BTreeSet<ReplicaId>>,
    storage_ready: RwLock<HashSet<ReplicaId>>,
    store: Arc<ReplicaStore>,
}

impl ReplicaRegistry {
    pub fn new(local: ReplicaId, peers: Vec<PeerConfig>, store: Arc<ReplicaStore>) -> Self {
        let registry = Self {
            local: local.clone(),
            peers: peers.clone(),
            known: RwLock::new(BTreeSet::new()),
            storage_ready: RwLock::new(HashSet::new()),
            store,
        };
        registry.register(&local);
        for peer in &peers {
            registry.register(&peer.id);
        }
        registry
    }

    pub fn from_config(config: &ReplicaConfig, store: Arc<ReplicaStore>) -> Self {
        Self::new(config.local_id(), config.peers.clone(), store)
    }

    /// Admit every replica id that already has a namespace in storage.
    pub fn load_from_store(&self) -> StoreResult<usize> {
        let namespaces = self.store.namespaces()?;
        let mut ready = self.storage_ready.write();
        let mut admitted = 0;
        for id in namespaces {
            if self.register(&id) {
                admitted += 1;
            }
            ready.insert(id);
        }
        Ok(admitted)
    }

    pub fn local_id(&self) -> &ReplicaId {
        &self.local
    }

    /// Add `replica_id` to the known set. Returns `true` on first sight.
    pub fn register(&self, replica_id: &ReplicaId) -> bool {
        if replica_id.is_empty() {
            return false;
        }
        let added = self.known.write().insert(replica_id.clone());
        if added {
            info!(replica = %self.local, registered = %replica_id, "registered replica");
        }
        added
    }

    pub fn is_known(&self, replica_id: &ReplicaId) -> bool {
        self.known.read().contains(replica_id)
    }

    /// Every known id, including the local one, in ascending order.
    pub fn all_known_ids(&self) -> Vec<ReplicaId> {
        self.known.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.known.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.read().is_empty()
    }

    /// Make sure storage has a namespace for `replica_id`, and register it.
    ///
    /// Safe to call repeatedly and concurrently for the same id.
    pub fn ensure_storage(&self, replica_id: &ReplicaId) -> StoreResult<()> {
        if self.storage_ready.read().contains(replica_id) {
            return Ok(());
        }
        if self.store.ensure_namespace(replica_id)? {
            info!(replica = %self.local, namespace = %replica_id, "created storage namespace");
        }
        self.storage_ready.write().insert(replica_id.clone());
        self.register(replica_id);
        Ok(())
    }

    /// Configured peers.
    pub fn peers(&self) -> &[PeerConfig] {
        &self.peers
    }

    /// Address of a configured peer.
    pub fn address_of(&self, replica_id: &ReplicaId) -> Option<&PeerAddress> {
        self.peers
            .iter()
            .find(|p| &p.id == replica_id)
            .map(|p| &p.address)
    }
}
