//! Error types for counter operations.

use thiserror::Error;

/// Errors raised by [`GCounter`](crate::GCounter) mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    #[error("Invalid argument: increment amount must be >= 0, got {0}")]
    NegativeIncrement(i64),

    #[error("count {count} for replica {replica} exceeds the storable maximum")]
    CountOutOfRange { replica: String, count: u64 },
}

pub type Result<T> = std::result::Result<T, CounterError>;
