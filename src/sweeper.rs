//! Expiry Sweeper
//!
//! Periodically drops ledger entries whose message id has fallen below the
//! retention cutoff, sent or not. This is the only path that deletes ledger
//! rows. Runs independently of star traffic and stops on a watch signal.

use crate::cutoff::{cutoff, DEFAULT_RETENTION};
use crate::ids::MessageId;
use crate::store::{Ledger, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub retention: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            retention: DEFAULT_RETENTION,
        }
    }
}

/// Outcome of one sweep cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries examined
    pub scanned: usize,
    pub deleted: usize,
    /// Expired entries whose delete failed; retried next cycle
    pub failed: usize,
}

pub struct ExpirySweeper<L: Ledger> {
    ledger: Arc<L>,
    config: SweeperConfig,
}

impl<L: Ledger> ExpirySweeper<L> {
    pub fn new(ledger: Arc<L>, config: SweeperConfig) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// One cycle against the current wall-clock cutoff.
    pub async fn sweep_once(&self) -> StoreResult<SweepReport> {
        self.sweep_before(cutoff(self.config.retention)).await
    }

    /// Delete every entry with an id below `cutoff`.
    pub async fn sweep_before(&self, cutoff: MessageId) -> StoreResult<SweepReport> {
        let ids = self.ledger.ids().await?;
        let mut report = SweepReport {
            scanned: ids.len(),
            ..Default::default()
        };

        for id in ids.into_iter().filter(|id| *id < cutoff) {
            match self.ledger.delete(id).await {
                Ok(true) => report.deleted += 1,
                // Already gone
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(message_id = %id, error = %e, "Failed to delete expired message");
                }
            }
        }

        Ok(report)
    }

    /// Sweep every interval until `shutdown` turns true or its sender is dropped.
    ///
    /// A cycle in progress always finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            retention_secs = self.config.retention.as_secs(),
            "Expiry sweeper started"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => match self.sweep_once().await {
                    Ok(report) if report.deleted > 0 || report.failed > 0 => info!(
                        scanned = report.scanned,
                        deleted = report.deleted,
                        failed = report.failed,
                        "Sweep completed"
                    ),
                    Ok(report) => debug!(scanned = report.scanned, "Nothing to sweep"),
                    Err(e) => error!(error = %e, "Sweep failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Expiry sweeper stopped");
    }

    /// Run the sweeper on its own task.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
