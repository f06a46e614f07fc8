//! Background loops driven by the registry (watchdog, notifier, reaper).
//!
//! Module organization:
//! - `watchdog.rs` - Run-timeout detection for running jobs
//! - `purge.rs` - Expired record deletion and affinity compaction
//!
//! Each pass iterates a snapshot of the live queues and runs on the
//! blocking pool, since every step goes through SQLite.

mod purge;
mod watchdog;

pub use purge::PurgeReport;

use std::sync::Arc;

use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use super::registry::QueueRegistry;
use super::types::now_secs;

impl QueueRegistry {
    /// Run the watchdog, notifier and reaper loops until shutdown.
    pub async fn background_tasks(self: Arc<Self>) {
        let (purge_secs, watchdog_secs, notify_secs) = {
            let config = self.config.read();
            (
                config.background.purge_interval_secs.max(1),
                config.background.watchdog_interval_secs.max(1),
                config.background.notify_interval_secs.max(1),
            )
        };
        let mut purge_ticker = interval(Duration::from_secs(purge_secs));
        let mut watchdog_ticker = interval(Duration::from_secs(watchdog_secs));
        let mut notify_ticker = interval(Duration::from_secs(notify_secs));

        info!(purge_secs, watchdog_secs, notify_secs, "Background tasks started");

        loop {
            if self.is_shutdown() {
                info!("Background tasks stopped");
                return;
            }

            tokio::select! {
                _ = watchdog_ticker.tick() => {
                    self.run_blocking("watchdog", |r| { r.watchdog_pass(); }).await;
                }
                _ = notify_ticker.tick() => {
                    self.run_blocking("notify", |r| { r.notify_pass(); }).await;
                }
                _ = purge_ticker.tick() => {
                    self.run_blocking("purge", |r| { r.purge_pass(); }).await;
                }
            }
        }
    }

    async fn run_blocking<F>(self: &Arc<Self>, pass: &'static str, f: F)
    where
        F: FnOnce(&QueueRegistry) + Send + 'static,
    {
        let registry = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || f(&registry)).await {
            error!(pass, error = %e, "Background pass aborted");
        }
    }

    /// Demote overdue running jobs in every queue. Returns jobs demoted.
    pub fn watchdog_pass(&self) -> usize {
        self.live_queues()
            .iter()
            .map(|q| q.check_execution_timeout())
            .sum()
    }

    /// Send throttled "work available" notifications. Returns datagrams sent.
    pub fn notify_pass(&self) -> usize {
        self.live_queues()
            .iter()
            .map(|q| q.notify_listeners(false))
            .sum()
    }

    /// Reap every queue, then remove idle dynamic queues.
    pub fn purge_pass(&self) -> PurgeReport {
        let (batch_size, max_deletes) = {
            let config = self.config.read();
            (
                config.background.purge_batch_size,
                config.background.max_deletes_per_pass,
            )
        };
        let mut total = PurgeReport::default();
        for queue in self.live_queues() {
            match queue.purge(batch_size, max_deletes) {
                Ok(report) => {
                    total.expired += report.expired;
                    total.erased += report.erased;
                    total.workers += report.workers;
                    total.affinities += report.affinities;
                }
                Err(e) => warn!(queue = %queue.name(), error = %e, "Purge pass failed"),
            }
        }
        self.expire_idle_queues(now_secs());
        total
    }
}
