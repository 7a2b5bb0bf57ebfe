//! # tally-store
//!
//! Durable storage for per-replica view counts.
//!
//! Every `(item, replica)` pair owns one [`Entry`]. Entries are grouped into
//! one namespace per replica id; namespaces appear lazily the first time a
//! replica id is written, so the number of replicas is never fixed up front.
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryStore`] | *(always available)* | Tests, simulations |
//! | `SqliteStore` | `sqlite` (default) | Replica processes |
//!
//! [`ReplicaStore`] wraps a backend with per-row locks so the local
//! increment path can read-modify-write without losing updates.
//!
//! ```
//! use tally_core::ReplicaId;
//! use tally_store::{EntryStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! let r1 = ReplicaId::new("replica-1");
//! store.upsert(7, &r1, 3).unwrap();
//! assert!(!store.merge_max(7, &r1, 2).unwrap());
//! assert_eq!(store.get(7, &r1).unwrap().unwrap().count, 3);
//! ```

mod entry;
mod error;
mod locks;
mod memory;
mod replica_store;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use entry::{Entry, StoreStats};
pub use error::{Result, StoreError};
pub use locks::{RowGuard, RowLocks};
pub use memory::MemoryStore;
pub use replica_store::ReplicaStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteConfig, SqliteStore};
pub use traits::EntryStore;
