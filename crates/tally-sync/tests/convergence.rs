//! Multi-replica convergence over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;
use tally_core::{GCounter, ReplicaId};
use tally_sync::{
    MemoryTransport, PeerAddress, PeerConfig, Replica, ReplicaConfig, SyncMessage, TallyError,
};

type MemReplica = Arc<Replica<MemoryTransport>>;

fn address(id: &str) -> String {
    format!("mem://{id}")
}

/// Fully meshed replicas sharing one in-memory network.
fn cluster(ids: &[&str], push: bool) -> (Arc<MemoryTransport>, Vec<MemReplica>) {
    let transport = Arc::new(MemoryTransport::new());
    let replicas: Vec<MemReplica> = ids
        .iter()
        .map(|id| {
            let peers = ids
                .iter()
                .filter(|other| *other != id)
                .map(|other| PeerConfig::new(*other, address(other)));
            let config = ReplicaConfig::builder(*id)
                .peers(peers)
                .push_enabled(push)
                .lock_timeout(2_000)
                .peer_timeout(500)
                .build();
            Arc::new(Replica::in_memory(config, transport.clone()).unwrap())
        })
        .collect();

    for (id, replica) in ids.iter().zip(&replicas) {
        transport.attach(PeerAddress::new(address(id)), Arc::downgrade(&replica.handler()));
    }
    (transport, replicas)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_views_on_one_replica_lose_nothing() {
    let (_net, replicas) = cluster(&["replica-1"], false);
    let replica = replicas[0].clone();

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let replica = replica.clone();
            tokio::spawn(async move { replica.views().record_view(11).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(replica.views().local_views(11).unwrap(), 100);
    assert_eq!(replica.views().total_views(11).await.unwrap(), 100);
}

#[tokio::test]
async fn two_replicas_converge_after_pulls() {
    let (_net, replicas) = cluster(&["replica-a", "replica-b"], false);
    let (a, b) = (&replicas[0], &replicas[1]);

    for _ in 0..30 {
        a.views().record_view(1).await.unwrap();
    }
    for _ in 0..20 {
        b.views().record_view(1).await.unwrap();
    }
    assert_eq!(a.views().breakdown(1).unwrap().value(), 30);

    a.service().pull_and_merge(1).await.unwrap();
    b.service().pull_and_merge(1).await.unwrap();

    assert_eq!(a.views().total_views(1).await.unwrap(), 50);
    assert_eq!(b.views().total_views(1).await.unwrap(), 50);
    assert_eq!(a.views().breakdown(1).unwrap(), b.views().breakdown(1).unwrap());
}

#[tokio::test]
async fn push_reaches_peers_without_reads() {
    let (_net, replicas) = cluster(&["replica-1", "replica-2", "replica-3"], true);

    replicas[0].views().record_views(5, 4).await.unwrap();
    settle().await;

    for replica in &replicas[1..] {
        assert_eq!(
            replica.views().breakdown(5).unwrap().replica_value("replica-1"),
            4
        );
    }
}

#[tokio::test]
async fn duplicate_delivery_changes_nothing() {
    let (net, replicas) = cluster(&["replica-1", "replica-2"], true);
    net.set_duplicate_pushes(true);

    replicas[0].views().record_views(2, 7).await.unwrap();
    settle().await;
    let after_first = replicas[1].views().breakdown(2).unwrap();

    let replay = SyncMessage {
        item_id: 2,
        source_replica_id: ReplicaId::new("replica-1"),
        counts: GCounter::from_counts([("replica-1", 7u64)]),
    };
    replicas[1].service().receive_push(replay.clone()).await.unwrap();
    replicas[1].service().receive_push(replay).await.unwrap();

    assert_eq!(replicas[1].views().breakdown(2).unwrap(), after_first);
    assert_eq!(after_first.value(), 7);
}

#[tokio::test]
async fn partitioned_replica_serves_local_total_then_heals() {
    let (net, replicas) = cluster(&["replica-1", "replica-2"], true);
    let (a, b) = (&replicas[0], &replicas[1]);

    net.set_reachable(&PeerAddress::new(address("replica-2")), false);
    net.set_reachable(&PeerAddress::new(address("replica-1")), false);

    a.views().record_views(3, 5).await.unwrap();
    b.views().record_views(3, 2).await.unwrap();
    settle().await;

    assert_eq!(a.views().total_views(3).await.unwrap(), 5);
    assert_eq!(b.views().total_views(3).await.unwrap(), 2);

    net.set_reachable(&PeerAddress::new(address("replica-2")), true);
    net.set_reachable(&PeerAddress::new(address("replica-1")), true);

    assert_eq!(a.views().total_views(3).await.unwrap(), 7);
    assert_eq!(b.views().total_views(3).await.unwrap(), 7);
}

#[tokio::test]
async fn unknown_replica_is_admitted_from_push() {
    let (_net, replicas) = cluster(&["replica-1"], false);
    let replica = &replicas[0];

    replica
        .service()
        .receive_push(SyncMessage {
            item_id: 9,
            source_replica_id: ReplicaId::new("replica-42"),
            counts: GCounter::from_counts([("replica-42", 3u64)]),
        })
        .await
        .unwrap();

    assert!(replica.registry().is_known(&ReplicaId::new("replica-42")));
    assert_eq!(replica.views().total_views(9).await.unwrap(), 3);
}

#[tokio::test]
async fn discovered_counts_flow_through_intermediate_replica() {
    // replica-3 only talks to replica-2; replica-1 learns its count via replica-2.
    let transport = Arc::new(MemoryTransport::new());
    let make = |id: &str, peers: &[&str]| {
        let config = ReplicaConfig::builder(id)
            .peers(peers.iter().map(|p| PeerConfig::new(*p, address(p))))
            .push_enabled(false)
            .build();
        Arc::new(Replica::in_memory(config, transport.clone()).unwrap())
    };
    let r1 = make("replica-1", &["replica-2"]);
    let r2 = make("replica-2", &["replica-1", "replica-3"]);
    let r3 = make("replica-3", &["replica-2"]);
    for (id, replica) in [("replica-1", &r1), ("replica-2", &r2), ("replica-3", &r3)] {
        transport.attach(PeerAddress::new(address(id)), Arc::downgrade(&replica.handler()));
    }

    r3.views().record_views(4, 6).await.unwrap();
    r2.service().pull_and_merge(4).await.unwrap();

    assert_eq!(r1.views().total_views(4).await.unwrap(), 6);
    assert!(r1.registry().is_known(&ReplicaId::new("replica-3")));
}

#[tokio::test]
async fn sweep_converges_every_item() {
    let (_net, replicas) = cluster(&["replica-1", "replica-2"], false);
    for item in 0..5 {
        replicas[0].views().record_views(item, item + 1).await.unwrap();
        replicas[1].views().record_views(item, 10).await.unwrap();
    }

    let report = replicas[0].scheduler().sweep().await.unwrap();
    assert_eq!(report.items, 5);
    assert_eq!(report.failed, 0);

    for item in 0..5 {
        assert_eq!(
            replicas[0].views().breakdown(item).unwrap().value(),
            (item as u64 + 1) + 10
        );
    }
}

#[tokio::test]
async fn held_row_lock_times_out_increment() {
    let transport = Arc::new(MemoryTransport::new());
    let config = ReplicaConfig::builder("replica-1")
        .lock_timeout(50)
        .push_enabled(false)
        .build();
    let replica = Replica::in_memory(config, transport).unwrap();

    let (_guard, _) = replica
        .store()
        .get_for_update(1, &ReplicaId::new("replica-1"))
        .await
        .unwrap();
    let err = replica.views().record_view(1).await.unwrap_err();
    assert!(matches!(err, TallyError::Timeout(_)));
}

#[tokio::test]
async fn negative_increment_is_rejected() {
    let (_net, replicas) = cluster(&["replica-1"], false);
    let err = replicas[0].views().record_views(1, -1).await.unwrap_err();
    assert!(matches!(err, TallyError::InvalidArgument(_)));
    assert_eq!(replicas[0].views().total_views(1).await.unwrap(), 0);
}
