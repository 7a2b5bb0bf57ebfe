//! One fully wired replica.

use crate::config::ReplicaConfig;
use crate::error::Result;
use crate::facade::ViewCounter;
use crate::network::{InboundHandler, PeerTransport};
use crate::registry::ReplicaRegistry;
use crate::scheduler::{ScheduleSettings, Scheduler, SchedulerHandle};
use crate::service::SyncService;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tally_core::ReplicaId;
use tally_store::{EntryStore, ReplicaStore};
use tracing::info;

/// Store, registry, sync service, scheduler and facade for one replica id.
pub struct Replica<T: PeerTransport> {
    config: ReplicaConfig,
    store: Arc<ReplicaStore>,
    registry: Arc<ReplicaRegistry>,
    service: Arc<SyncService<T>>,
    views: ViewCounter<T>,
    scheduler: Arc<Scheduler<T>>,
    started_at: DateTime<Utc>,
}

impl<T: PeerTransport> Replica<T> {
    pub fn new(config: ReplicaConfig, backend: Arc<dyn EntryStore>, transport: Arc<T>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(ReplicaStore::new(backend, config.lock_timeout()));
        let registry = Arc::new(ReplicaRegistry::from_config(&config, store.clone()));
        let admitted = registry.load_from_store()?;
        registry.ensure_storage(registry.local_id())?;

        let service = Arc::new(SyncService::new(
            registry.clone(),
            store.clone(),
            transport,
            config.peer_timeout(),
        ));
        let views = ViewCounter::new(service.clone(), config.push_enabled);
        let scheduler = Arc::new(Scheduler::new(
            service.clone(),
            ScheduleSettings::from_config(&config),
        ));

        info!(
            replica = %registry.local_id(),
            peers = config.peers.len(),
            admitted_from_storage = admitted,
            push_enabled = config.push_enabled,
            "replica initialized"
        );

        Ok(Self {
            config,
            store,
            registry,
            service,
            views,
            scheduler,
            started_at: Utc::now(),
        })
    }

    /// In-memory replica, for tests and simulations.
    pub fn in_memory(config: ReplicaConfig, transport: Arc<T>) -> Result<Self> {
        let backend: Arc<dyn EntryStore> = Arc::new(tally_store::MemoryStore::new());
        Self::new(config, backend, transport)
    }

    pub fn id(&self) -> &ReplicaId {
        self.registry.local_id()
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ReplicaRegistry> {
        &self.registry
    }

    pub fn service(&self) -> &Arc<SyncService<T>> {
        &self.service
    }

    pub fn views(&self) -> &ViewCounter<T> {
        &self.views
    }

    pub fn scheduler(&self) -> &Arc<Scheduler<T>> {
        &self.scheduler
    }

    /// The sync service as an inbound handler, for attaching to a transport.
    pub fn handler(&self) -> Arc<dyn InboundHandler> {
        self.service.clone()
    }

    pub fn start_scheduler(&self) -> SchedulerHandle {
        Arc::clone(&self.scheduler).start()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
