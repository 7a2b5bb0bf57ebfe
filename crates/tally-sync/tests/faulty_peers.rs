//! Replicas talking to peers that misbehave: oversized counts and peers that never answer.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_core::{GCounter, ReplicaId};
use tally_store::{EntryStore, SqliteStore};
use tally_sync::{
    InboundHandler, MemoryTransport, PeerAddress, PeerConfig, PushAck, Replica, ReplicaConfig,
    StateRequest, StateResponse, SyncMessage, TallyError,
};

/// Answers every state request with the same counter.
struct FixedState {
    id: ReplicaId,
    counts: GCounter,
}

#[async_trait]
impl InboundHandler for FixedState {
    async fn handle_push(&self, _message: SyncMessage) -> Result<PushAck, TallyError> {
        Ok(PushAck::ok(self.id.clone()))
    }

    async fn handle_state_request(
        &self,
        request: StateRequest,
    ) -> Result<StateResponse, TallyError> {
        Ok(StateResponse {
            item_id: request.item_id,
            replica_id: self.id.clone(),
            counts: self.counts.clone(),
        })
    }
}

/// Accepts calls and never answers.
struct Silent;

#[async_trait]
impl InboundHandler for Silent {
    async fn handle_push(&self, _message: SyncMessage) -> Result<PushAck, TallyError> {
        std::future::pending().await
    }

    async fn handle_state_request(
        &self,
        _request: StateRequest,
    ) -> Result<StateResponse, TallyError> {
        std::future::pending().await
    }
}

fn attach(net: &MemoryTransport, address: &str, handler: &Arc<dyn InboundHandler>) {
    net.attach(PeerAddress::new(address), Arc::downgrade(handler));
}

fn fixed(id: &str, counts: GCounter) -> Arc<dyn InboundHandler> {
    Arc::new(FixedState {
        id: ReplicaId::new(id),
        counts,
    })
}

#[tokio::test]
async fn oversized_peer_counts_are_skipped_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replica-a.db");
    let net = Arc::new(MemoryTransport::new());

    let oversized = fixed("replica-b", GCounter::from_counts([("replica-9", u64::MAX)]));
    let healthy = fixed("replica-c", GCounter::from_counts([("replica-c", 5u64)]));
    attach(&net, "mem://b", &oversized);
    attach(&net, "mem://c", &healthy);

    let backend: Arc<dyn EntryStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let config = ReplicaConfig::builder("replica-a")
        .peers([
            PeerConfig::new("replica-b", "mem://b"),
            PeerConfig::new("replica-c", "mem://c"),
        ])
        .push_enabled(false)
        .periodic_sync(false)
        .database(&path)
        .build();
    let a = Replica::new(config, backend, net.clone()).unwrap();

    a.views().record_views(1, 2).await.unwrap();

    let report = a.service().pull_and_merge(1).await.unwrap();
    assert_eq!(report.peers_reached, 1);
    assert_eq!(report.peers_failed, 1);
    assert_eq!(a.views().total_views(1).await.unwrap(), 7);
    assert_eq!(a.views().breakdown(1).unwrap().replica_value("replica-9"), 0);

    let sweep = a.scheduler().sweep().await.unwrap();
    assert_eq!(sweep.items, 1);
    assert_eq!(sweep.failed, 0);
}

#[tokio::test]
async fn oversized_push_is_rejected_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replica-a.db");
    let backend: Arc<dyn EntryStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let config = ReplicaConfig::builder("replica-a")
        .push_enabled(false)
        .periodic_sync(false)
        .database(&path)
        .build();
    let a = Replica::new(config, backend, Arc::new(MemoryTransport::new())).unwrap();

    let err = a
        .service()
        .receive_push(SyncMessage {
            item_id: 4,
            source_replica_id: ReplicaId::new("replica-8"),
            counts: GCounter::from_counts([("replica-8", 3u64), ("replica-9", u64::MAX)]),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TallyError::InvalidArgument(_)));
    assert!(!a.registry().is_known(&ReplicaId::new("replica-8")));
    assert_eq!(a.views().breakdown(4).unwrap().value(), 0);
}

#[tokio::test]
async fn silent_peer_stalls_neither_writes_nor_reads() {
    let peer_timeout = Duration::from_millis(300);
    let net = Arc::new(MemoryTransport::new());

    let silent: Arc<dyn InboundHandler> = Arc::new(Silent);
    let healthy = fixed("replica-c", GCounter::from_counts([("replica-c", 5u64)]));
    attach(&net, "mem://hang", &silent);
    attach(&net, "mem://c", &healthy);

    let config = ReplicaConfig::builder("replica-a")
        .peers([
            PeerConfig::new("replica-hang", "mem://hang"),
            PeerConfig::new("replica-c", "mem://c"),
        ])
        .push_enabled(true)
        .periodic_sync(false)
        .peer_timeout(peer_timeout.as_millis() as u64)
        .build();
    let a = Replica::in_memory(config, net.clone()).unwrap();

    let started = Instant::now();
    a.views().record_view(1).await.unwrap();
    assert!(started.elapsed() < peer_timeout / 3, "record_view waited on a push");

    let started = Instant::now();
    let total = a.views().total_views(1).await.unwrap();
    let elapsed = started.elapsed();
    assert_eq!(total, 6);
    assert!(elapsed >= peer_timeout, "silent peer answered: {elapsed:?}");
    assert!(elapsed < peer_timeout * 3, "pull outlived its peer timeout: {elapsed:?}");
}
