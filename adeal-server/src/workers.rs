//! Spawns the background reconcilers.

use adeal_core::clients::{TelegramBot, TonApiClient};
use adeal_core::clock::SystemClock;
use adeal_core::processors::{
    ExpiryReconciler, OutboxDispatcher, PaymentReconciler, PublicationScheduler, Reconciler,
    SettlementVerifier, WorkerRunner,
};
use adeal_core::store::PgStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::LoadedConfig;

/// Handles of the running workers plus the switch that stops them.
pub struct Workers {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    pub fn spawn(store: Arc<PgStore>, config: &LoadedConfig) -> Self {
        let clock = Arc::new(SystemClock);
        let ton = Arc::new(TonApiClient::new(&config.ton));
        let bot = Arc::new(TelegramBot::new(&config.telegram));
        let workers = config.workers;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = vec![
            spawn(
                ExpiryReconciler::new(store.clone(), clock.clone(), workers.expiry.batch_size),
                workers.expiry.interval,
                shutdown_rx.clone(),
            ),
            spawn(
                PaymentReconciler::new(
                    store.clone(),
                    ton,
                    clock.clone(),
                    config.ton.deposit_address.clone(),
                    config.ton.transaction_limit,
                    workers.payment.batch_size,
                ),
                workers.payment.interval,
                shutdown_rx.clone(),
            ),
            spawn(
                PublicationScheduler::new(
                    store.clone(),
                    bot.clone(),
                    clock.clone(),
                    workers.publication.batch_size,
                ),
                workers.publication.interval,
                shutdown_rx.clone(),
            ),
            spawn(
                SettlementVerifier::new(
                    store.clone(),
                    bot.clone(),
                    clock.clone(),
                    workers.settlement.batch_size,
                ),
                workers.settlement.interval,
                shutdown_rx.clone(),
            ),
            spawn(
                OutboxDispatcher::new(
                    store,
                    bot,
                    clock,
                    workers.outbox.batch_size,
                    config.outbox,
                ),
                workers.outbox.interval,
                shutdown_rx,
            ),
        ];

        tracing::info!(count = handles.len(), "Workers started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Signal every worker and wait for the current ticks to finish.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(true).is_err() {
            tracing::debug!("All workers already stopped");
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Workers stopped");
    }
}

fn spawn<R: Reconciler + 'static>(
    reconciler: R,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(WorkerRunner::new(reconciler, interval).run(shutdown_rx))
}
