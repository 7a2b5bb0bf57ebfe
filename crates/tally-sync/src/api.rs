//! HTTP surface of a replica: the sync endpoints peers call, a health
//! check, and the view-count routes.

use crate::error::TallyError;
use crate::http::{STATE_PATH, SYNC_PATH};
use crate::message::{PushAck, StateRequest, StateResponse, SyncMessage};
use crate::network::PeerTransport;
use crate::replica::Replica;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_core::{GCounter, ItemId, ReplicaId};
use tower_http::trace::TraceLayer;

/// Error body: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub TallyError);

impl From<TallyError> for ApiError {
    fn from(err: TallyError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            TallyError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            TallyError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    source_replica_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordQuery {
    amount: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    pub item_id: ItemId,
    pub peers_reached: usize,
    pub peers_failed: usize,
    pub entries_written: usize,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub replica_id: ReplicaId,
    pub known_replicas: Vec<ReplicaId>,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordResponse {
    pub item_id: ItemId,
    pub replica_id: ReplicaId,
    pub local_views: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewsResponse {
    pub item_id: ItemId,
    pub total_views: u64,
    pub breakdown: GCounter,
}

/// Build the router for `replica`.
pub fn router<T: PeerTransport>(replica: Arc<Replica<T>>) -> Router {
    Router::new()
        .route(SYNC_PATH, post(receive_push::<T>))
        .route(&format!("{STATE_PATH}/:item_id"), get(serve_state::<T>))
        .route("/api/crdt/sync/pull/:item_id", post(pull::<T>))
        .route("/api/crdt/health", get(health::<T>))
        .route(
            "/api/items/:item_id/views",
            post(record_views::<T>).get(total_views::<T>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(replica)
}

async fn receive_push<T: PeerTransport>(
    State(replica): State<Arc<Replica<T>>>,
    Json(message): Json<SyncMessage>,
) -> ApiResult<PushAck> {
    Ok(Json(replica.service().receive_push(message).await?))
}

async fn serve_state<T: PeerTransport>(
    State(replica): State<Arc<Replica<T>>>,
    Path(item_id): Path<ItemId>,
    Query(query): Query<StateQuery>,
) -> ApiResult<StateResponse> {
    let request = StateRequest {
        item_id,
        source_replica_id: query
            .source_replica_id
            .map(ReplicaId::new)
            .filter(|id| !id.is_empty()),
    };
    Ok(Json(replica.service().serve_state(request)?))
}

async fn pull<T: PeerTransport>(
    State(replica): State<Arc<Replica<T>>>,
    Path(item_id): Path<ItemId>,
) -> ApiResult<PullResponse> {
    let report = replica.service().pull_and_merge(item_id).await?;
    Ok(Json(PullResponse {
        item_id,
        peers_reached: report.peers_reached,
        peers_failed: report.peers_failed,
        entries_written: report.entries_written,
        total: report.total,
    }))
}

async fn health<T: PeerTransport>(State(replica): State<Arc<Replica<T>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        replica_id: replica.id().clone(),
        known_replicas: replica.registry().all_known_ids(),
        timestamp: Utc::now(),
        uptime_secs: replica.uptime_secs(),
    })
}

async fn record_views<T: PeerTransport>(
    State(replica): State<Arc<Replica<T>>>,
    Path(item_id): Path<ItemId>,
    Query(query): Query<RecordQuery>,
) -> Result<(StatusCode, Json<RecordResponse>), ApiError> {
    let amount = query.amount.unwrap_or(1);
    let local_views = replica.views().record_views(item_id, amount).await?;
    Ok((
        StatusCode::CREATED,
        Json(RecordResponse {
            item_id,
            replica_id: replica.id().clone(),
            local_views,
        }),
    ))
}

async fn total_views<T: PeerTransport>(
    State(replica): State<Arc<Replica<T>>>,
    Path(item_id): Path<ItemId>,
) -> ApiResult<ViewsResponse> {
    let total_views = replica.views().total_views(item_id).await?;
    let breakdown = replica.views().breakdown(item_id)?;
    Ok(Json(ViewsResponse {
        item_id,
        total_views,
        breakdown,
    }))
}
