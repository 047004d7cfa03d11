//! ExpiryReconciler.
//!
//! Moves `Agreed` / `AwaitingPayment` deals whose offer window has closed to
//! `Expired`. Nothing was paid in either state, so there is nothing to refund;
//! an open invoice is closed as `Expired` in the same unit of work.

use super::runner::{Reconciler, TickReport, WorkerError};
use crate::clock::Clock;
use crate::entities::{
    DealContext, DealEventKind, DealStamps, DealStatus, NewDealEvent, PaymentStatus,
};
use crate::store::{DealStore, StoreError, UnitOfWork, Write};
use adeal_sdk::objects::{Notification, OutboxEnvelope};
use async_trait::async_trait;
use std::sync::Arc;
use time::PrimitiveDateTime;
use tracing::{debug, error, info, warn};

pub struct ExpiryReconciler {
    store: Arc<dyn DealStore>,
    clock: Arc<dyn Clock>,
    batch_size: i64,
}

impl ExpiryReconciler {
    pub fn new(store: Arc<dyn DealStore>, clock: Arc<dyn Clock>, batch_size: i64) -> Self {
        Self {
            store,
            clock,
            batch_size,
        }
    }

    async fn expire(&self, ctx: &DealContext, now: PrimitiveDateTime) -> Result<(), WorkerError> {
        let deal = &ctx.deal;
        let from = deal.status;
        let expired = Notification::DealExpired {
            deal_id: deal.id,
            previous_status: from.into(),
        };

        let mut unit = UnitOfWork::new();
        unit.transition(deal.id, from, DealStatus::Expired, now, DealStamps::default())?
            .event(NewDealEvent::transition(
                deal.id,
                DealEventKind::Expired,
                from,
                DealStatus::Expired,
                now,
            ))
            .notify(
                &OutboxEnvelope::new(ctx.parties.advertiser_chat_id, expired.clone()),
                now,
            )?
            .notify(&OutboxEnvelope::new(ctx.parties.payee_chat_id, expired), now)?;
        if from == DealStatus::AwaitingPayment {
            unit.push(Write::SetPaymentStatus {
                deal_id: deal.id,
                from: PaymentStatus::Pending,
                to: PaymentStatus::Expired,
            });
        }
        self.store.commit(unit).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ExpiryReconciler {
    fn name(&self) -> &'static str {
        "expiry_reconciler"
    }

    async fn tick(&self) -> Result<TickReport, WorkerError> {
        let now = self.clock.now();
        let deals = self.store.expirable_deals(now, self.batch_size).await?;
        if deals.is_empty() {
            debug!("No deals to expire");
            return Ok(TickReport::default());
        }

        let mut report = TickReport::default();
        for ctx in &deals {
            let deal_id = ctx.deal.id;
            match self.expire(ctx, now).await {
                Ok(()) => {
                    info!(deal_id = %deal_id, from = %ctx.deal.status, "Deal expired");
                    report.processed += 1;
                }
                Err(WorkerError::Store(e @ StoreError::StatusConflict { .. })) => {
                    warn!(deal_id = %deal_id, error = %e, "Deal moved on before expiry, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(deal_id = %deal_id, error = %e, "Failed to expire deal");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
