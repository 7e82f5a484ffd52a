//! Background merge of entities left with concurrent versions.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::repository::DataRepository;

/// Outcome of one maintenance pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub partitions: usize,
    pub scanned: usize,
    pub merged: usize,
    pub failed: usize,
}

/// Scans every opened partition and merges entities that need it.
pub struct DataMaintenance {
    repo: Arc<DataRepository>,
}

impl DataMaintenance {
    pub fn new(repo: Arc<DataRepository>) -> Self {
        Self { repo }
    }

    /// One blocking pass over every opened partition.
    pub fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        for partition in self.repo.subscriber().partitions() {
            report.partitions += 1;
            for container in partition.chain().get_all_data(None) {
                report.scanned += 1;
                if !container.requires_merge() {
                    continue;
                }
                match self.repo.merge_if_required(partition.key(), &container.id()) {
                    Ok(true) => report.merged += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.failed += 1;
                        error!(partition = %partition.key(), id = %container.id(), error = %e, "merge failed");
                    }
                }
            }
        }
        report
    }

    /// Pause before the next pass, randomized so that competing nodes
    /// do not merge the same entities in lockstep.
    fn next_sleep(&self) -> Duration {
        let config = self.repo.config();
        let min = config.maintenance_min_sleep_ms;
        let max = config.maintenance_max_sleep_ms.max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!("data maintenance started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.next_sleep()) => {
                    let this = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || this.run_once()).await {
                        Ok(report) if report.merged > 0 || report.failed > 0 => {
                            info!(merged = report.merged, failed = report.failed, scanned = report.scanned, "maintenance wave");
                        }
                        Ok(report) => debug!(scanned = report.scanned, "maintenance pass idle"),
                        Err(e) => error!(error = %e, "maintenance pass aborted"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("data maintenance shutting down");
                    break;
                }
            }
        }

        info!("data maintenance stopped");
    }
}

/// Handle on a running maintenance task.
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Ask the task to stop after the current pass.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            error!(error = %e, "maintenance task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Spawn the maintenance loop on the current tokio runtime.
pub fn start(repo: Arc<DataRepository>) -> MaintenanceHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = Arc::new(DataMaintenance::new(repo));
    let task = tokio::spawn(maintenance.run(shutdown_rx));
    MaintenanceHandle { shutdown_tx, task }
}
