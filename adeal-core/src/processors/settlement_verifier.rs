//! SettlementVerifier.
//!
//! Once a campaign window has closed, takes the post down and settles the
//! deal: `Posted -> Verified -> Released` in one unit of work, moving the
//! agreed price from the payee's locked escrow to their withdrawable balance.
//! No deal is ever left `Verified` by this path.

use super::runner::{Reconciler, TickReport, WorkerError};
use crate::clients::ChannelMessenger;
use crate::clock::Clock;
use crate::entities::{
    DealContext, DealEventKind, DealStamps, DealStatus, EscrowTransactionKind, NewDealEvent,
    NewEscrowTransaction, TON,
};
use crate::store::{DealStore, EscrowMovement, StoreError, UnitOfWork, Write};
use adeal_sdk::objects::{Notification, OutboxEnvelope, TonAmount};
use async_trait::async_trait;
use std::sync::Arc;
use time::PrimitiveDateTime;
use tracing::{debug, error, info, warn};

pub struct SettlementVerifier {
    store: Arc<dyn DealStore>,
    messenger: Arc<dyn ChannelMessenger>,
    clock: Arc<dyn Clock>,
    batch_size: i64,
}

impl SettlementVerifier {
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

    /// The combined verify + release step.
    async fn settle(&self, ctx: &DealContext, now: PrimitiveDateTime) -> Result<(), WorkerError> {
        let deal = &ctx.deal;
        let amount = TonAmount::new(deal.agreed_price)?;

        let mut unit = UnitOfWork::new();
        unit.transition(
            deal.id,
            DealStatus::Posted,
            DealStatus::Verified,
            now,
            DealStamps {
                verified_at: Some(now),
                ..DealStamps::default()
            },
        )?
        .transition(
            deal.id,
            DealStatus::Verified,
            DealStatus::Released,
            now,
            DealStamps {
                escrow_released_at: Some(now),
                ..DealStamps::default()
            },
        )?
        .push(Write::ReleaseEscrow(EscrowMovement {
            user_id: deal.payee_id,
            currency: TON.to_string(),
            amount: deal.agreed_price,
            at: now,
        }))
        .push(Write::RecordLedger(NewEscrowTransaction {
            deal_id: deal.id,
            payment_id: None,
            user_id: deal.payee_id,
            kind: EscrowTransactionKind::FundsReleased,
            amount: deal.agreed_price,
            currency: TON.to_string(),
            tx_hash: None,
            created_at: now,
        }))
        .event(NewDealEvent::transition(
            deal.id,
            DealEventKind::Verified,
            DealStatus::Posted,
            DealStatus::Verified,
            now,
        ))
        .event(NewDealEvent::transition(
            deal.id,
            DealEventKind::Released,
            DealStatus::Verified,
            DealStatus::Released,
            now,
        ))
        .notify(
            &OutboxEnvelope::new(
                ctx.parties.advertiser_chat_id,
                Notification::PostVerified { deal_id: deal.id },
            ),
            now,
        )?
        .notify(
            &OutboxEnvelope::new(
                ctx.parties.payee_chat_id,
                Notification::FundsReleased {
                    deal_id: deal.id,
                    amount,
                },
            ),
            now,
        )?;
        self.store.commit(unit).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for SettlementVerifier {
    fn name(&self) -> &'static str {
        "settlement_verifier"
    }

    async fn tick(&self) -> Result<TickReport, WorkerError> {
        let now = self.clock.now();
        let deals = self.store.due_settlements(now, self.batch_size).await?;
        if deals.is_empty() {
            debug!("No settlements due");
            return Ok(TickReport::default());
        }

        let mut report = TickReport::default();
        for ctx in &deals {
            let deal_id = ctx.deal.id;
            if let Some(message_id) = ctx.deal.posted_message_id {
                let deleted = self
                    .messenger
                    .delete_message(ctx.parties.channel_chat_id, message_id)
                    .await;
                // Removal is best-effort; the closed window is what settles.
                if let Err(e) = deleted {
                    warn!(deal_id = %deal_id, message_id, error = %e, "Failed to delete post");
                }
            }

            match self.settle(ctx, now).await {
                Ok(()) => {
                    info!(deal_id = %deal_id, amount = %ctx.deal.agreed_price, "Deal settled");
                    report.processed += 1;
                }
                Err(WorkerError::Store(e @ StoreError::StatusConflict { .. })) => {
                    warn!(deal_id = %deal_id, error = %e, "Deal moved on before settlement");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(deal_id = %deal_id, error = %e, "Failed to settle deal");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
