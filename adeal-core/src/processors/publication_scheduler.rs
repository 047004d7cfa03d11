//! PublicationScheduler.
//!
//! Publishes the approved creative of every due `Scheduled` deal to its
//! channel and records the published message.

use super::runner::{Reconciler, TickReport, WorkerError};
use crate::clients::{ChannelMessenger, MessengerError};
use crate::clock::Clock;
use crate::entities::{
    Creative, CreativeMedia, DealContext, DealEventKind, DealStamps, DealStatus, MediaKind,
    NewDealEvent,
};
use crate::store::{DealStore, StoreError, UnitOfWork};
use adeal_sdk::objects::{Notification, OutboxEnvelope};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use time::PrimitiveDateTime;
use tracing::{debug, error, info, warn};

/// Post a creative to a chat, returning the published message id.
pub async fn publish(
    messenger: &dyn ChannelMessenger,
    chat_id: i64,
    creative: &Creative,
) -> Result<i64, MessengerError> {
    let caption = creative.text.as_deref();
    match &creative.media {
        Some(CreativeMedia {
            kind: MediaKind::Photo,
            file_id,
        }) => messenger.send_photo(chat_id, file_id, caption).await,
        Some(CreativeMedia {
            kind: MediaKind::Video,
            file_id,
        }) => messenger.send_video(chat_id, file_id, caption).await,
        Some(CreativeMedia {
            kind: MediaKind::Document,
            file_id,
        }) => messenger.send_document(chat_id, file_id, caption).await,
        None => {
            messenger
                .send_message(chat_id, caption.unwrap_or_default())
                .await
        }
    }
}

pub struct PublicationScheduler {
    store: Arc<dyn DealStore>,
    messenger: Arc<dyn ChannelMessenger>,
    clock: Arc<dyn Clock>,
    batch_size: i64,
}

impl PublicationScheduler {
    pub fn new(
        store: Arc<dyn DealStore>,
        messenger: Arc<dyn ChannelMessenger>,
        clock: Arc<dyn Clock>,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            messenger,
            clock,
            batch_size,
        }
    }

    async fn record_posted(
        &self,
        ctx: &DealContext,
        message_id: i64,
        now: PrimitiveDateTime,
    ) -> Result<(), WorkerError> {
        let deal = &ctx.deal;
        let published = Notification::PostPublished {
            deal_id: deal.id,
            message_id,
        };

        let mut unit = UnitOfWork::new();
        unit.transition(
            deal.id,
            DealStatus::Scheduled,
            DealStatus::Posted,
            now,
            DealStamps {
                posted_at: Some(now),
                posted_message_id: Some(message_id),
                ..DealStamps::default()
            },
        )?
        .event(
            NewDealEvent::transition(
                deal.id,
                DealEventKind::Posted,
                DealStatus::Scheduled,
                DealStatus::Posted,
                now,
            )
            .with_payload(json!({ "message_id": message_id })),
        )
        .notify(
            &OutboxEnvelope::new(ctx.parties.advertiser_chat_id, published.clone()),
            now,
        )?
        .notify(&OutboxEnvelope::new(ctx.parties.payee_chat_id, published), now)?;
        self.store.commit(unit).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for PublicationScheduler {
    fn name(&self) -> &'static str {
        "publication_scheduler"
    }

    async fn tick(&self) -> Result<TickReport, WorkerError> {
        let now = self.clock.now();
        let deals = self.store.due_publications(now, self.batch_size).await?;
        if deals.is_empty() {
            debug!("No publications due");
            return Ok(TickReport::default());
        }

        let mut report = TickReport::default();
        for ctx in &deals {
            let deal_id = ctx.deal.id;
            let Some(creative) = ctx.deal.creative() else {
                warn!(deal_id = %deal_id, "Scheduled deal has no creative yet, retrying next tick");
                report.skipped += 1;
                continue;
            };

            let message_id =
                match publish(self.messenger.as_ref(), ctx.parties.channel_chat_id, &creative)
                    .await
                {
                    Ok(message_id) => message_id,
                    Err(e) => {
                        warn!(deal_id = %deal_id, error = %e, "Failed to publish, retrying next tick");
                        report.failed += 1;
                        continue;
                    }
                };

            match self.record_posted(ctx, message_id, now).await {
                Ok(()) => {
                    info!(deal_id = %deal_id, message_id, "Creative published");
                    report.processed += 1;
                }
                Err(WorkerError::Store(e @ StoreError::StatusConflict { .. })) => {
                    warn!(deal_id = %deal_id, message_id, error = %e, "Deal moved on after publishing");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(deal_id = %deal_id, message_id, error = %e, "Published but failed to record the post");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
