//! Transport abstraction for replica-to-replica calls.
//!
//! [`PeerTransport`] is the outbound side (push, state pull); the inbound
//! side is [`InboundHandler`], implemented by the sync service. The HTTP
//! transport lives in [`crate::http`]; [`MemoryTransport`] wires handlers
//! together in-process for tests and simulations.

use crate::error::TallyError;
use crate::message::{PushAck, StateRequest, StateResponse, SyncMessage};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;

/// Base address of a peer (e.g. `http://backend2:8080`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        Self(address.trim().trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure of a single call to a single peer.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum NetworkError {
    #[error("{peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("{peer} did not answer within {after:?}")]
    Timeout { peer: String, after: Duration },

    #[error("{peer} rejected the request with status {status}: {body}")]
    Rejected {
        peer: String,
        status: u16,
        body: String,
    },

    #[error("{peer} sent an unreadable response: {reason}")]
    Decode { peer: String, reason: String },
}

/// Outbound calls to peers.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Deliver a push message to `peer`.
    async fn push(&self, peer: &PeerAddress, message: &SyncMessage)
        -> Result<PushAck, NetworkError>;

    /// Ask `peer` for its full known counter for an item.
    async fn fetch_state(
        &self,
        peer: &PeerAddress,
        request: &StateRequest,
    ) -> Result<StateResponse, NetworkError>;
}

/// Inbound side of the sync protocol.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle_push(&self, message: SyncMessage) -> Result<PushAck, TallyError>;

    async fn handle_state_request(&self, request: StateRequest)
        -> Result<StateResponse, TallyError>;
}

/// In-process transport routing calls straight to registered handlers.
///
/// Addresses can be marked unreachable to simulate partitions, and every
/// push can be delivered twice to exercise replay.
#[derive(Default)]
pub struct MemoryTransport {
    handlers: RwLock<HashMap<PeerAddress, Weak<dyn InboundHandler>>>,
    unreachable: RwLock<HashSet<PeerAddress>>,
    duplicate_pushes: AtomicBool,
    delivered: AtomicU64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler answering calls to `address`.
    pub fn attach(&self, address: PeerAddress, handler: Weak<dyn InboundHandler>) {
        self.handlers.write().insert(address, handler);
    }

    pub fn detach(&self, address: &PeerAddress) {
        self.handlers.write().remove(address);
    }

    /// Cut `address` off from (or reconnect it to) everyone else.
    pub fn set_reachable(&self, address: &PeerAddress, reachable: bool) {
        let mut unreachable = self.unreachable.write();
        if reachable {
            unreachable.remove(address);
        } else {
            unreachable.insert(address.clone());
        }
    }

    /// Deliver every push twice.
    pub fn set_duplicate_pushes(&self, enabled: bool) {
        self.duplicate_pushes.store(enabled, Ordering::SeqCst);
    }

    /// Number of messages that reached a handler.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    fn route(&self, peer: &PeerAddress) -> Result<Arc<dyn InboundHandler>, NetworkError> {
        if self.unreachable.read().contains(peer) {
            return Err(NetworkError::Unreachable {
                peer: peer.to_string(),
                reason: "partitioned".to_string(),
            });
        }
        self.handlers
            .read()
            .get(peer)
            .and_then(Weak::upgrade)
            .ok_or_else(|| NetworkError::Unreachable {
                peer: peer.to_string(),
                reason: "no handler attached".to_string(),
            })
    }

    fn rejected(peer: &PeerAddress, err: TallyError) -> NetworkError {
        let status = match err {
            TallyError::InvalidArgument(_) => 400,
            TallyError::Timeout(_) => 503,
            _ => 500,
        };
        NetworkError::Rejected {
            peer: peer.to_string(),
            status,
            body: err.to_string(),
        }
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn push(
        &self,
        peer: &PeerAddress,
        message: &SyncMessage,
    ) -> Result<PushAck, NetworkError> {
        let handler = self.route(peer)?;
        let copies = if self.duplicate_pushes.load(Ordering::SeqCst) {
            2
        } else {
            1
        };
        let mut ack = None;
        for _ in 0..copies {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            ack = Some(
                handler
                    .handle_push(message.clone())
                    .await
                    .map_err(|e| Self::rejected(peer, e))?,
            );
        }
        ack.ok_or_else(|| NetworkError::Decode {
            peer: peer.to_string(),
            reason: "no acknowledgment".to_string(),
        })
    }

    async fn fetch_state(
        &self,
        peer: &PeerAddress,
        request: &StateRequest,
    ) -> Result<StateResponse, NetworkError> {
        let handler = self.route(peer)?;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        handler
            .handle_state_request(request.clone())
            .await
            .map_err(|e| Self::rejected(peer, e))
    }
}
