//! OutboxDispatcher.
//!
//! Delivers queued notifications at least once. Failed deliveries back off
//! exponentially (`2^retry_count` minutes) and are dead-lettered after the
//! configured number of attempts.

use super::runner::{Reconciler, TickReport, WorkerError};
use crate::clients::{Notifier, NotifyError};
use crate::clock::Clock;
use crate::config::OutboxConfig;
use crate::entities::OutboxMessage;
use crate::store::OutboxStore;
use async_trait::async_trait;
use std::sync::Arc;
use time::{Duration, PrimitiveDateTime};
use tracing::{debug, error, info, warn};

/// Wait before the next attempt after `retry_count` failures.
pub fn retry_delay(retry_count: i32) -> Duration {
    Duration::minutes(1i64 << retry_count.clamp(0, 30))
}

pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    batch_size: i64,
    config: OutboxConfig,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        batch_size: i64,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            batch_size,
            config,
        }
    }

    async fn deliver(&self, message: &OutboxMessage) -> Result<(), NotifyError> {
        let envelope = message.envelope()?;
        self.notifier.deliver(&envelope).await
    }

    async fn record_failure(
        &self,
        message: &OutboxMessage,
        cause: &NotifyError,
        now: PrimitiveDateTime,
    ) -> Result<(), WorkerError> {
        let retry_count = message.retry_count + 1;
        if retry_count >= self.config.max_attempts {
            error!(
                message_id = %message.id,
                message_type = %message.message_type,
                retry_count,
                error = %cause,
                "Notification dead-lettered"
            );
            self.store
                .mark_outbox_failed(message.id, retry_count, cause.to_string(), None)
                .await?;
        } else {
            let next_retry_at = now + retry_delay(retry_count);
            warn!(
                message_id = %message.id,
                message_type = %message.message_type,
                retry_count,
                next_retry_at = %next_retry_at,
                error = %cause,
                "Notification delivery failed"
            );
            self.store
                .mark_outbox_failed(message.id, retry_count, cause.to_string(), Some(next_retry_at))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for OutboxDispatcher {
    fn name(&self) -> &'static str {
        "outbox_dispatcher"
    }

    async fn tick(&self) -> Result<TickReport, WorkerError> {
        let now = self.clock.now();
        let stale_before = now - self.config.claim_timeout;
        let messages = self
            .store
            .claim_outbox_batch(now, stale_before, self.batch_size)
            .await?;
        if messages.is_empty() {
            debug!("Outbox is empty");
            return Ok(TickReport::default());
        }

        let mut report = TickReport::default();
        for message in &messages {
            match self.deliver(message).await {
                Ok(()) => match self.store.mark_outbox_completed(message.id, now).await {
                    Ok(()) => {
                        info!(message_id = %message.id, message_type = %message.message_type, "Notification delivered");
                        report.processed += 1;
                    }
                    Err(e) => {
                        // Redelivered once the claim goes stale.
                        error!(message_id = %message.id, error = %e, "Delivered but failed to mark completed");
                        report.failed += 1;
                    }
                },
                Err(cause) => {
                    if let Err(e) = self.record_failure(message, &cause, now).await {
                        error!(message_id = %message.id, error = %e, "Failed to record delivery failure");
                    }
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{NewOutboxMessage, OutboxStatus};
    use crate::store::{DealStore, UnitOfWork, Write};
    use crate::testing::{FakeNotifier, Fixture, T0};
    use adeal_sdk::objects::{Notification, OutboxEnvelope};
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn dispatcher(fx: &Fixture, notifier: Arc<FakeNotifier>) -> OutboxDispatcher {
        OutboxDispatcher::new(
            fx.store.clone(),
            notifier,
            fx.clock.clone(),
            10,
            OutboxConfig::default(),
        )
    }

    async fn enqueue(fx: &Fixture, chat_id: i64, at: PrimitiveDateTime) {
        let mut unit = UnitOfWork::new();
        unit.notify(
            &OutboxEnvelope::new(
                chat_id,
                Notification::PostVerified {
                    deal_id: Uuid::new_v4(),
                },
            ),
            at,
        )
        .unwrap();
        fx.store.commit(unit).await.unwrap();
    }

    #[test]
    fn test_retry_delay_doubles() {
        assert_eq!(retry_delay(0), Duration::minutes(1));
        assert_eq!(retry_delay(1), Duration::minutes(2));
        assert_eq!(retry_delay(3), Duration::minutes(8));
    }

    #[tokio::test]
    async fn test_delivers_oldest_first_and_completes() {
        let fx = Fixture::new();
        enqueue(&fx, 2, T0 - Duration::minutes(1)).await;
        enqueue(&fx, 1, T0 - Duration::minutes(5)).await;
        let notifier = Arc::new(FakeNotifier::default());

        let report = dispatcher(&fx, notifier.clone()).tick().await.unwrap();

        assert_eq!(report.processed, 2);
        let order: Vec<i64> = notifier
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.recipient_chat_id)
            .collect();
        assert_eq!(order, vec![1, 2]);
        assert!(
            fx.store
                .outbox()
                .iter()
                .all(|m| m.status == OutboxStatus::Completed && m.processed_at == Some(T0))
        );
    }

    #[tokio::test]
    async fn test_third_failure_backs_off_eight_minutes() {
        let fx = Fixture::new();
        enqueue(&fx, 1, T0).await;
        let notifier = Arc::new(FakeNotifier::default());
        notifier.fail.store(true, Ordering::SeqCst);
        let dispatcher = dispatcher(&fx, notifier.clone());

        for _ in 0..3 {
            let report = dispatcher.tick().await.unwrap();
            assert_eq!(report.failed, 1);
            let next = fx.store.outbox()[0].next_retry_at.unwrap();
            fx.clock.set(next);
        }

        let outbox = fx.store.outbox();
        let message = &outbox[0];
        assert_eq!(message.status, OutboxStatus::Failed);
        assert_eq!(message.retry_count, 3);
        assert!(message.last_error.as_deref().unwrap().contains("Too Many Requests"));

        // Failures at T0, T0 + 2m and T0 + 2m + 4m.
        let third_failure_at = T0 + Duration::minutes(6);
        assert_eq!(message.next_retry_at, Some(third_failure_at + Duration::minutes(8)));

        // Not selected before the retry time.
        notifier.fail.store(false, Ordering::SeqCst);
        fx.clock.set(third_failure_at + Duration::minutes(7));
        assert!(dispatcher.tick().await.unwrap().is_idle());
        fx.clock.set(third_failure_at + Duration::minutes(8));
        assert_eq!(dispatcher.tick().await.unwrap().processed, 1);
    }

    #[tokio::test]
    async fn test_dead_letters_after_max_attempts() {
        let fx = Fixture::new();
        enqueue(&fx, 1, T0).await;
        let notifier = Arc::new(FakeNotifier::default());
        notifier.fail.store(true, Ordering::SeqCst);
        let dispatcher = OutboxDispatcher::new(
            fx.store.clone(),
            notifier,
            fx.clock.clone(),
            10,
            OutboxConfig {
                max_attempts: 2,
                ..OutboxConfig::default()
            },
        );

        dispatcher.tick().await.unwrap();
        fx.clock.advance(Duration::minutes(2));
        dispatcher.tick().await.unwrap();

        let outbox = fx.store.outbox();
        let message = &outbox[0];
        assert_eq!(message.status, OutboxStatus::DeadLettered);
        assert_eq!(message.next_retry_at, None);
        fx.clock.advance(Duration::days(365));
        assert!(dispatcher.tick().await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn test_reclaims_abandoned_processing_claim() {
        let fx = Fixture::new();
        enqueue(&fx, 1, T0).await;
        // A worker claimed it and died.
        fx.store
            .claim_outbox_batch(T0, T0 - Duration::minutes(5), 10)
            .await
            .unwrap();
        let notifier = Arc::new(FakeNotifier::default());
        let dispatcher = dispatcher(&fx, notifier.clone());

        fx.clock.advance(Duration::minutes(1));
        assert!(dispatcher.tick().await.unwrap().is_idle());

        fx.clock.advance(Duration::minutes(5));
        assert_eq!(dispatcher.tick().await.unwrap().processed, 1);
        assert_eq!(notifier.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_payload_counts_as_failure() {
        let fx = Fixture::new();
        let mut unit = UnitOfWork::new();
        unit.push(Write::Enqueue(NewOutboxMessage {
            id: Uuid::new_v4(),
            message_type: "post_verified".to_string(),
            payload: serde_json::json!({ "unexpected": true }),
            created_at: T0,
        }));
        fx.store.commit(unit).await.unwrap();
        let notifier = Arc::new(FakeNotifier::default());

        let report = dispatcher(&fx, notifier.clone()).tick().await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(notifier.delivered.lock().unwrap().is_empty());
        assert_eq!(fx.store.outbox()[0].status, OutboxStatus::Failed);
    }
}
