//! Background reconciliation.
//!
//! Two loops run on their own timers, each after a startup delay:
//!
//! - the sweep pulls and merges every item this replica has stored,
//!   so replicas converge even when nobody reads or pushes;
//! - the deep sync makes sure every known replica has a storage namespace
//!   and logs storage statistics.

use crate::config::ReplicaConfig;
use crate::error::Result;
use crate::network::PeerTransport;
use crate::service::SyncService;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tally_store::StoreStats;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Timer settings for the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub sweep_enabled: bool,
    pub sweep_interval: Duration,
    pub sweep_startup_delay: Duration,
    pub deep_sync_interval: Duration,
    pub deep_sync_startup_delay: Duration,
}

impl ScheduleSettings {
    pub fn from_config(config: &ReplicaConfig) -> Self {
        Self {
            sweep_enabled: config.periodic_sync_enabled,
            sweep_interval: config.sync_interval(),
            sweep_startup_delay: config.sync_startup_delay(),
            deep_sync_interval: config.deep_sync_interval(),
            deep_sync_startup_delay: config.deep_sync_startup_delay(),
        }
    }
}

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub items: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Scheduler<T: PeerTransport> {
    service: Arc<SyncService<T>>,
    settings: ScheduleSettings,
}

impl<T: PeerTransport> Scheduler<T> {
    pub fn new(service: Arc<SyncService<T>>, settings: ScheduleSettings) -> Self {
        Self { service, settings }
    }

    pub fn settings(&self) -> &ScheduleSettings {
        &self.settings
    }

    /// Pull and merge every stored item once.
    ///
    /// A failing item is logged and the sweep moves on.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let items = self.service.store().item_ids()?;
        let mut report = SweepReport {
            items: items.len(),
            ..Default::default()
        };
        for item_id in items {
            match self.service.pull_and_merge(item_id).await {
                Ok(_) => report.succeeded += 1,
                Err(err) => {
                    error!(replica = %self.service.local_id(), item_id, error = %err, "sweep failed for item");
                    report.failed += 1;
                }
            }
        }
        debug!(
            replica = %self.service.local_id(),
            items = report.items,
            failed = report.failed,
            "sweep finished"
        );
        Ok(report)
    }

    /// Give every known replica a namespace and report storage statistics.
    pub fn deep_sync(&self) -> Result<StoreStats> {
        let registry = self.service.registry();
        for replica_id in registry.all_known_ids() {
            registry.ensure_storage(&replica_id)?;
        }
        let stats = self.service.store().stats()?;
        info!(
            replica = %self.service.local_id(),
            known_replicas = registry.len(),
            namespaces = stats.namespaces,
            items = stats.items,
            entries = stats.entries,
            "deep sync"
        );
        Ok(stats)
    }

    /// Spawn the timer loops. They stop when the handle is shut down or dropped.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, _) = watch::channel(false);
        let mut tasks = Vec::new();

        if self.settings.sweep_enabled {
            let scheduler = Arc::clone(&self);
            tasks.push(spawn_loop(
                "sweep",
                self.settings.sweep_startup_delay,
                self.settings.sweep_interval,
                shutdown_tx.subscribe(),
                move || {
                    let scheduler = Arc::clone(&scheduler);
                    async move {
                        if let Err(err) = scheduler.sweep().await {
                            error!(replica = %scheduler.service.local_id(), error = %err, "sweep aborted");
                        }
                    }
                },
            ));
        } else {
            info!(replica = %self.service.local_id(), "periodic sync disabled");
        }

        let scheduler = Arc::clone(&self);
        tasks.push(spawn_loop(
            "deep-sync",
            self.settings.deep_sync_startup_delay,
            self.settings.deep_sync_interval,
            shutdown_tx.subscribe(),
            move || {
                let scheduler = Arc::clone(&scheduler);
                async move {
                    if let Err(err) = scheduler.deep_sync() {
                        error!(replica = %scheduler.service.local_id(), error = %err, "deep sync failed");
                    }
                }
            },
        ));

        SchedulerHandle { shutdown_tx, tasks }
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    startup_delay: Duration,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(startup_delay) => {}
            _ = shutdown_rx.changed() => return,
        }
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => tick().await,
            }
        }
        debug!(task = name, "scheduler task stopped");
    })
}

/// Running scheduler loops.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop both loops and wait for them to finish their current tick.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
