//! Error types for replication and the view-count facade.

use crate::network::NetworkError;
use tally_core::CounterError;
use tally_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the facade, the sync service and the HTTP API.
#[derive(Error, Debug)]
pub enum TallyError {
    /// Rejected input; nothing was changed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The local row lock was not acquired in time; the caller may retry.
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("peer {peer} error: {reason}")]
    PeerError { peer: String, reason: String },

    #[error("storage failure: {0}")]
    StorageFailure(#[source] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StoreError> for TallyError {
    fn from(err: StoreError) -> Self {
        if err.is_timeout() {
            TallyError::Timeout(err.to_string())
        } else {
            TallyError::StorageFailure(err)
        }
    }
}

impl From<CounterError> for TallyError {
    fn from(err: CounterError) -> Self {
        TallyError::InvalidArgument(err.to_string())
    }
}

impl From<NetworkError> for TallyError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::Unreachable { peer, reason } => TallyError::PeerUnreachable { peer, reason },
            NetworkError::Timeout { peer, after } => TallyError::PeerUnreachable {
                peer,
                reason: format!("timed out after {after:?}"),
            },
            NetworkError::Rejected { peer, status, body } => TallyError::PeerError {
                peer,
                reason: format!("status {status}: {body}"),
            },
            NetworkError::Decode { peer, reason } => TallyError::PeerError { peer, reason },
        }
    }
}

pub type Result<T> = std::result::Result<T, TallyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tally_core::ReplicaId;

    #[test]
    fn test_lock_timeout_maps_to_timeout() {
        let err: TallyError = StoreError::LockTimeout {
            item_id: 1,
            replica_id: ReplicaId::new("replica-1"),
            waited: Duration::from_secs(3),
        }
        .into();
        assert!(matches!(err, TallyError::Timeout(_)));

        let err: TallyError = StoreError::CountOverflow(u64::MAX).into();
        assert!(matches!(err, TallyError::StorageFailure(_)));
    }

    #[test]
    fn test_counter_error_maps_to_invalid_argument() {
        let err: TallyError = CounterError::NegativeIncrement(-3).into();
        assert!(matches!(err, TallyError::InvalidArgument(msg) if msg.contains("-3")));
    }
}
