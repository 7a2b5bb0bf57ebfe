//! Two replicas talking over real HTTP on ephemeral ports.

use std::sync::Arc;
use std::time::Duration;
use tally_sync::api::{self, HealthResponse, PullResponse, RecordResponse, ViewsResponse};
use tally_sync::{HttpTransport, PeerConfig, Replica, ReplicaConfig};
use tokio::net::TcpListener;

struct Node {
    replica: Arc<Replica<HttpTransport>>,
    base: String,
}

async fn pair() -> (Node, Node) {
    let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_a = format!("http://{}", listener_a.local_addr().unwrap());
    let base_b = format!("http://{}", listener_b.local_addr().unwrap());

    let a = start("replica-a", listener_a, PeerConfig::new("replica-b", base_b.clone()));
    let b = start("replica-b", listener_b, PeerConfig::new("replica-a", base_a.clone()));
    (
        Node {
            replica: a,
            base: base_a,
        },
        Node {
            replica: b,
            base: base_b,
        },
    )
}

fn start(id: &str, listener: TcpListener, peer: PeerConfig) -> Arc<Replica<HttpTransport>> {
    let config = ReplicaConfig::builder(id)
        .peer(peer)
        .peer_timeout(1_000)
        .build();
    let transport = Arc::new(HttpTransport::new(config.peer_timeout()).unwrap());
    let replica = Arc::new(Replica::in_memory(config, transport).unwrap());
    let app = api::router(replica.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    replica
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn replicas_converge_over_http() {
    let (a, b) = pair().await;

    let recorded: RecordResponse = client()
        .post(format!("{}/api/items/1/views?amount=3", a.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(recorded.local_views, 3);

    b.replica.views().record_views(1, 2).await.unwrap();

    let views: ViewsResponse = client()
        .get(format!("{}/api/items/1/views", a.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(views.total_views, 5);
    assert_eq!(views.breakdown.replica_value("replica-b"), 2);

    assert_eq!(b.replica.views().total_views(1).await.unwrap(), 5);
}

#[tokio::test]
async fn push_delivers_local_entry() {
    let (a, b) = pair().await;

    a.replica.views().record_views(7, 4).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        b.replica.views().breakdown(7).unwrap().replica_value("replica-a"),
        4
    );
}

#[tokio::test]
async fn manual_pull_endpoint_merges() {
    let (a, b) = pair().await;
    b.replica.views().record_views(2, 6).await.unwrap();

    let report: PullResponse = client()
        .post(format!("{}/api/crdt/sync/pull/2", a.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report.peers_reached, 1);
    assert_eq!(report.total, 6);
}

#[tokio::test]
async fn health_lists_known_replicas() {
    let (a, _b) = pair().await;

    let health: HealthResponse = client()
        .get(format!("{}/api/crdt/health", a.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health.status, "UP");
    assert_eq!(health.replica_id.as_str(), "replica-a");
    assert_eq!(health.known_replicas.len(), 2);
}

#[tokio::test]
async fn invalid_requests_get_400() {
    let (a, _b) = pair().await;

    let response = client()
        .post(format!("{}/api/items/1/views?amount=-1", a.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("invalid argument"));

    let response = client()
        .post(format!("{}/api/crdt/sync", a.base))
        .json(&serde_json::json!({
            "item_id": 1,
            "source_replica_id": "",
            "counts": {}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn state_endpoint_registers_requester() {
    let (a, _b) = pair().await;
    a.replica.views().record_views(3, 1).await.unwrap();

    let state: serde_json::Value = client()
        .get(format!("{}/api/crdt/state/3?source_replica_id=replica-z", a.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["replica_id"], "replica-a");
    assert_eq!(state["counts"]["replica-a"], 1);
    assert!(a
        .replica
        .registry()
        .is_known(&tally_core::ReplicaId::new("replica-z")));
}
