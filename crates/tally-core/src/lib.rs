//! Core CRDT types for Tally.
//!
//! - [`lattice`]: the join-semilattice trait every state-based CRDT implements
//! - [`gcounter`]: the grow-only counter used for per-item view counts
//! - [`ids`]: replica and item identifiers shared by every crate
pub mod error;
pub mod gcounter;
pub mod ids;
pub mod lattice;

pub use error::{CounterError, Result};
pub use gcounter::{GCounter, MAX_COUNT};
pub use ids::{ItemId, ReplicaId};
pub use lattice::Lattice;
