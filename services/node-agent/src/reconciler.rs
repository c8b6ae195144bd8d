//! Periodic status reconciliation.
//!
//! The sweeper:
//! - Runs one status sync over every tracked pod per tick
//! - Never overlaps two sweeps
//! - Stops at the next pod boundary once cancelled

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::lifecycle::{PodLifecycleController, SweepReport};

/// Status sweep configuration.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Interval between sweeps.
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Drives status sweeps over the tracked pods.
pub struct StatusSweeper {
    controller: Arc<PodLifecycleController>,
    config: SweepConfig,

    /// Held for the duration of a sweep.
    running: Mutex<()>,
}

impl StatusSweeper {
    pub fn new(controller: Arc<PodLifecycleController>, config: SweepConfig) -> Self {
        Self {
            controller,
            config,
            running: Mutex::new(()),
        }
    }

    /// Reconcile all tracked pods now.
    ///
    /// A call made while another sweep is in progress waits for it to finish.
    pub async fn sweep_once(&self, cancel: &CancellationToken) -> SweepReport {
        let _guard = self.running.lock().await;
        let report = self.controller.update_pod_statuses(cancel).await;

        debug!(
            visited = report.visited,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped_terminal = report.skipped_terminal,
            failed = report.failed,
            cancelled = report.cancelled,
            "Status sweep finished"
        );
        report
    }

    /// Sweep on every tick until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting status sweep loop"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep_once(&cancel).await;
                }
                _ = cancel.cancelled() => {
                    info!("Status sweep loop shutting down");
                    break;
                }
            }
        }
    }
}
