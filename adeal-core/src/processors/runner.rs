//! Periodic driver shared by every reconciler.

use crate::clients::{MessengerError, ObserverError};
use crate::state_machine::TransitionError;
use crate::store::StoreError;
use adeal_sdk::objects::AmountError;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("blockchain observation failed: {0}")]
    Observer(#[from] ObserverError),

    #[error("messaging failed: {0}")]
    Messenger(#[from] MessengerError),

    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub processed: usize,
    /// Items left for a later tick (conflicts, missing content, duplicates).
    pub skipped: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.processed == 0 && self.skipped == 0 && self.failed == 0
    }
}

/// A worker that brings persisted state in line with time or external facts.
///
/// A tick processes one bounded batch, one item at a time. Per-item failures
/// are counted in the report; an `Err` means the whole tick was abandoned.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn tick(&self) -> Result<TickReport, WorkerError>;
}

/// Runs a reconciler on a fixed interval until shutdown.
pub struct WorkerRunner<R> {
    reconciler: R,
    interval: Duration,
}

impl<R: Reconciler> WorkerRunner<R> {
    pub fn new(reconciler: R, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let name = self.reconciler.name();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(worker = name, interval = ?self.interval, "Worker started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(worker = name, "Worker received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.reconciler.tick().await {
                        Ok(report) if report.is_idle() => {
                            debug!(worker = name, "Nothing to do");
                        }
                        Ok(report) => {
                            info!(
                                worker = name,
                                processed = report.processed,
                                skipped = report.skipped,
                                failed = report.failed,
                                "Tick finished"
                            );
                        }
                        Err(e) => {
                            error!(worker = name, error = %e, "Tick failed");
                        }
                    }
                }
            }
        }

        info!(worker = name, "Worker shutdown complete");
    }
}
