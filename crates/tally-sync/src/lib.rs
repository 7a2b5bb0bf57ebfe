//! # tally-sync
//!
//! Replication for the Tally view counter.
//!
//! A replica records views against its own entry, pushes that entry to its
//! peers in the background, and pulls peer state before answering a read.
//! A scheduler repeats the pull for every stored item so replicas converge
//! even when nobody reads.
//!
//! ## Pieces
//!
//! - [`ReplicaRegistry`]: known replica ids and configured peer addresses
//! - [`SyncService`]: push, pull-and-merge, inbound handling
//! - [`Scheduler`]: periodic sweep and deep sync
//! - [`ViewCounter`]: `record_view` / `total_views`
//! - [`Replica`]: all of the above wired from a [`ReplicaConfig`]
//!
//! Peers are reached through a [`PeerTransport`]. [`HttpTransport`] talks
//! to the routes served by [`api::router`]; [`MemoryTransport`] connects
//! replicas inside one process.
//!
//! ```
//! use std::sync::Arc;
//! use tally_sync::{MemoryTransport, Replica, ReplicaConfig};
//!
//! tokio_test::block_on(async {
//!     let replica = Replica::in_memory(
//!         ReplicaConfig::builder("replica-1").build(),
//!         Arc::new(MemoryTransport::new()),
//!     )
//!     .unwrap();
//!     replica.views().record_view(42).await.unwrap();
//!     assert_eq!(replica.views().total_views(42).await.unwrap(), 1);
//! });
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod facade;
pub mod http;
pub mod message;
pub mod network;
pub mod registry;
pub mod replica;
pub mod scheduler;
pub mod service;

pub use config::{replica_id_from_url, PeerConfig, ReplicaConfig, ReplicaConfigBuilder};
pub use error::{Result, TallyError};
pub use facade::ViewCounter;
pub use http::HttpTransport;
pub use message::{PushAck, StateRequest, StateResponse, SyncMessage};
pub use network::{InboundHandler, MemoryTransport, NetworkError, PeerAddress, PeerTransport};
pub use registry::ReplicaRegistry;
pub use replica::Replica;
pub use scheduler::{ScheduleSettings, Scheduler, SchedulerHandle, SweepReport};
pub use service::{PushReport, SyncReport, SyncService};
