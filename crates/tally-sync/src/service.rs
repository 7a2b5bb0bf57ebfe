//! Push, pull-and-merge, and inbound sync handling.

use crate::error::{Result, TallyError};
use crate::message::{PushAck, StateRequest, StateResponse, SyncMessage};
use crate::network::{InboundHandler, NetworkError, PeerAddress, PeerTransport};
use crate::registry::ReplicaRegistry;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tally_core::{GCounter, ItemId, Lattice, ReplicaId};
use tally_store::ReplicaStore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one push round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushReport {
    pub item_id: ItemId,
    pub delivered: usize,
    pub failed: usize,
}

/// Outcome of one pull-and-merge round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub item_id: ItemId,
    pub peers_reached: usize,
    pub peers_failed: usize,
    /// Entries raised in local storage.
    pub entries_written: usize,
    /// Total after the merge.
    pub total: u64,
}

/// Replication engine for one replica.
///
/// Peer failures never leave this type as errors: an unreachable or
/// misbehaving peer simply does not contribute to the round. Local storage
/// failures are returned to the caller.
pub struct SyncService<T: PeerTransport> {
    local: ReplicaId,
    registry: Arc<ReplicaRegistry>,
    store: Arc<ReplicaStore>,
    transport: Arc<T>,
    peer_timeout: Duration,
}

impl<T: PeerTransport> SyncService<T> {
    pub fn new(
        registry: Arc<ReplicaRegistry>,
        store: Arc<ReplicaStore>,
        transport: Arc<T>,
        peer_timeout: Duration,
    ) -> Self {
        Self {
            local: registry.local_id().clone(),
            registry,
            store,
            transport,
            peer_timeout,
        }
    }

    pub fn local_id(&self) -> &ReplicaId {
        &self.local
    }

    pub fn registry(&self) -> &Arc<ReplicaRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// This replica's own entry for `item_id`, as a counter.
    pub fn local_counts(&self, item_id: ItemId) -> Result<GCounter> {
        let mut counts = GCounter::new();
        if let Some(entry) = self.store.get(item_id, &self.local)? {
            counts.observe(entry.replica_id, entry.count);
        }
        Ok(counts)
    }

    /// Every stored entry for `item_id` across all known replicas.
    pub fn local_counter(&self, item_id: ItemId) -> Result<GCounter> {
        Ok(self
            .store
            .counter(item_id, &self.registry.all_known_ids())?)
    }

    /// Send this replica's own entry for `item_id` to every peer.
    pub async fn push(&self, item_id: ItemId) -> Result<PushReport> {
        let mut report = PushReport {
            item_id,
            ..Default::default()
        };
        let counts = self.local_counts(item_id)?;
        if counts.is_empty() {
            debug!(replica = %self.local, item_id, "nothing to push");
            return Ok(report);
        }

        let message = SyncMessage {
            item_id,
            source_replica_id: self.local.clone(),
            counts,
        };
        let peers = self.registry.peers();
        let sends = peers.iter().map(|peer| self.push_to(&peer.address, &message));
        let results = join_all(sends).await;

        for (peer, result) in peers.iter().zip(results) {
            match result {
                Ok(ack) => {
                    debug!(replica = %self.local, peer = %peer.id, item_id, status = %ack.status, "push delivered");
                    report.delivered += 1;
                }
                Err(err) => {
                    warn!(replica = %self.local, peer = %peer.id, item_id, error = %err, "push failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Run [`push`](Self::push) in the background.
    pub fn spawn_push(self: &Arc<Self>, item_id: ItemId) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = service.push(item_id).await {
                warn!(replica = %service.local, item_id, error = %err, "background push failed");
            }
        })
    }

    /// Fetch every peer's state for `item_id` and fold it into local storage.
    pub async fn pull_and_merge(&self, item_id: ItemId) -> Result<SyncReport> {
        let mut merged = self.local_counter(item_id)?;
        let request = StateRequest {
            item_id,
            source_replica_id: Some(self.local.clone()),
        };

        let peers = self.registry.peers();
        let fetches = peers.iter().map(|peer| self.fetch_from(&peer.address, &request));
        let results = join_all(fetches).await;

        let mut report = SyncReport {
            item_id,
            ..Default::default()
        };
        for (peer, result) in peers.iter().zip(results) {
            match result.and_then(|response| Self::checked_response(&peer.address, response)) {
                Ok(response) => {
                    self.registry.register(&response.replica_id);
                    merged.join_assign(&response.counts);
                    report.peers_reached += 1;
                }
                Err(err) => {
                    warn!(replica = %self.local, peer = %peer.id, item_id, error = %err, "pull skipped peer");
                    report.peers_failed += 1;
                }
            }
        }

        report.entries_written = self.persist(item_id, &merged).await?;
        report.total = merged.value();
        if report.entries_written > 0 {
            info!(
                replica = %self.local,
                item_id,
                written = report.entries_written,
                total = report.total,
                "merged remote state"
            );
        }
        Ok(report)
    }

    /// Merge a peer's push and acknowledge it.
    pub async fn receive_push(&self, message: SyncMessage) -> Result<PushAck> {
        if message.source_replica_id.is_empty() {
            return Err(TallyError::InvalidArgument(
                "source_replica_id must not be empty".to_string(),
            ));
        }
        message.counts.check_range()?;
        self.registry.register(&message.source_replica_id);

        let written = self.persist(message.item_id, &message.counts).await?;
        debug!(
            replica = %self.local,
            source = %message.source_replica_id,
            item_id = message.item_id,
            written,
            "received push"
        );
        Ok(PushAck::ok(self.local.clone()))
    }

    /// Answer a peer's state request with the full known counter.
    pub fn serve_state(&self, request: StateRequest) -> Result<StateResponse> {
        if let Some(source) = &request.source_replica_id {
            self.registry.register(source);
        }
        Ok(StateResponse {
            item_id: request.item_id,
            replica_id: self.local.clone(),
            counts: self.local_counter(request.item_id)?,
        })
    }

    /// A peer state that local storage could not hold counts as a failed peer.
    fn checked_response(
        address: &PeerAddress,
        response: StateResponse,
    ) -> std::result::Result<StateResponse, NetworkError> {
        match response.counts.check_range() {
            Ok(()) => Ok(response),
            Err(err) => Err(NetworkError::Decode {
                peer: address.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    async fn push_to(
        &self,
        address: &PeerAddress,
        message: &SyncMessage,
    ) -> std::result::Result<PushAck, NetworkError> {
        match tokio::time::timeout(self.peer_timeout, self.transport.push(address, message)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout {
                peer: address.to_string(),
                after: self.peer_timeout,
            }),
        }
    }

    async fn fetch_from(
        &self,
        address: &PeerAddress,
        request: &StateRequest,
    ) -> std::result::Result<StateResponse, NetworkError> {
        match tokio::time::timeout(self.peer_timeout, self.transport.fetch_state(address, request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout {
                peer: address.to_string(),
                after: self.peer_timeout,
            }),
        }
    }

    /// Write every entry of `counts` that beats what is stored.
    async fn persist(&self, item_id: ItemId, counts: &GCounter) -> Result<usize> {
        let mut written = 0;
        for (replica_id, count) in counts.iter() {
            self.registry.ensure_storage(replica_id)?;
            let raised = if replica_id == &self.local {
                self.persist_own(item_id, count).await?
            } else {
                self.store.merge_remote(item_id, replica_id, count).await?
            };
            if raised {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Our own row is also written by local increments, so raise it under
    /// the row lock.
    async fn persist_own(&self, item_id: ItemId, count: u64) -> Result<bool> {
        let stored = self
            .store
            .get(item_id, &self.local)?
            .map_or(0, |entry| entry.count);
        if count <= stored {
            return Ok(false);
        }
        match self.store.get_for_update(item_id, &self.local).await {
            Ok((_guard, _)) => Ok(self.store.merge_remote(item_id, &self.local, count).await?),
            Err(err) if err.is_timeout() => {
                warn!(replica = %self.local, item_id, error = %err, "skipped own entry merge");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl<T: PeerTransport> InboundHandler for SyncService<T> {
    async fn handle_push(&self, message: SyncMessage) -> Result<PushAck> {
        self.receive_push(message).await
    }

    async fn handle_state_request(&self, request: StateRequest) -> Result<StateResponse> {
        self.serve_state(request)
    }
}
