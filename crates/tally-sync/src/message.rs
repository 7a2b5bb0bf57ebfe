//! Wire messages exchanged between replicas.
//!
//! ```text
//! POST /api/crdt/sync            SyncMessage   -> PushAck
//! GET  /api/crdt/state/{item_id} StateRequest  -> StateResponse
//! ```

use serde::{Deserialize, Serialize};
use tally_core::{GCounter, ItemId, ReplicaId};

/// Pushed by a replica after a local increment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub item_id: ItemId,
    pub source_replica_id: ReplicaId,
    pub counts: GCounter,
}

/// Acknowledgment of a push.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    pub status: String,
    pub replica_id: ReplicaId,
}

impl PushAck {
    pub fn ok(replica_id: ReplicaId) -> Self {
        Self {
            status: "ok".to_string(),
            replica_id,
        }
    }
}

/// "Give me your state for this item."
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRequest {
    pub item_id: ItemId,
    /// The requester, admitted into the responder's registry when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_replica_id: Option<ReplicaId>,
}

/// The responder's full known counter for an item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateResponse {
    pub item_id: ItemId,
    pub replica_id: ReplicaId,
    pub counts: GCounter,
}
