//! HTTP transport between replicas.

use crate::message::{PushAck, StateRequest, StateResponse, SyncMessage};
use crate::network::{NetworkError, PeerAddress, PeerTransport};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Route for inbound pushes.
pub const SYNC_PATH: &str = "/api/crdt/sync";
/// Route prefix for state requests; the item id follows.
pub const STATE_PATH: &str = "/api/crdt/state";

/// [`PeerTransport`] over HTTP/JSON.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| NetworkError::Unreachable {
                peer: "<client>".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn send_error(&self, peer: &PeerAddress, err: reqwest::Error) -> NetworkError {
        if err.is_timeout() {
            NetworkError::Timeout {
                peer: peer.to_string(),
                after: self.timeout,
            }
        } else {
            NetworkError::Unreachable {
                peer: peer.to_string(),
                reason: err.to_string(),
            }
        }
    }

    async fn read<R: DeserializeOwned>(
        &self,
        peer: &PeerAddress,
        response: reqwest::Response,
    ) -> Result<R, NetworkError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Rejected {
                peer: peer.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.send_error(peer, e))?;
        serde_json::from_slice(&bytes).map_err(|e| NetworkError::Decode {
            peer: peer.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn push(&self, peer: &PeerAddress, message: &SyncMessage) -> Result<PushAck, NetworkError> {
        let response = self
            .client
            .post(format!("{peer}{SYNC_PATH}"))
            .json(message)
            .send()
            .await
            .map_err(|e| self.send_error(peer, e))?;
        self.read(peer, response).await
    }

    async fn fetch_state(
        &self,
        peer: &PeerAddress,
        request: &StateRequest,
    ) -> Result<StateResponse, NetworkError> {
        let mut builder = self
            .client
            .get(format!("{peer}{STATE_PATH}/{}", request.item_id));
        if let Some(source) = &request.source_replica_id {
            builder = builder.query(&[("source_replica_id", source.as_str())]);
        }
        let response = builder.send().await.map_err(|e| self.send_error(peer, e))?;
        self.read(peer, response).await
    }
}
