//! Error types for the storage layer.

use std::time::Duration;
use tally_core::{ItemId, ReplicaId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("lock on item {item_id} for replica {replica_id} not acquired within {waited:?}")]
    LockTimeout {
        item_id: ItemId,
        replica_id: ReplicaId,
        waited: Duration,
    },

    #[error("count {0} exceeds the storable range")]
    CountOverflow(u64),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage worker failed: {0}")]
    Worker(String),

    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
