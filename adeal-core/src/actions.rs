//! User-driven deal transitions.
//!
//! Everything a party does to a deal goes through here: the same transition
//! table and the same unit of work the reconcilers use, so an action and a
//! worker racing on one deal cannot both win.

use crate::clock::Clock;
use crate::entities::{
    Creative, CreativeMedia, DealContext, DealEventKind, DealStamps, DealStatus,
    EscrowTransactionKind, NewDeal, NewDealEvent, NewEscrowTransaction, NewPayment, PaymentStatus,
    TON,
};
use crate::state_machine::{TransitionError, can_cancel};
use crate::store::{DealStore, EscrowMovement, StoreError, UnitOfWork, Write};
use adeal_sdk::objects::{AmountError, Notification, OutboxEnvelope, TonAmount, payment_uri};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, PrimitiveDateTime};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("user {actor} may not {action} deal {deal_id}")]
    Forbidden {
        actor: Uuid,
        deal_id: Uuid,
        action: &'static str,
    },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Terms both sides agreed on, turned into a deal by [`DealActions::accept_proposal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalAcceptance {
    pub listing_id: Option<Uuid>,
    pub channel_id: Option<Uuid>,
    pub advertiser_id: Uuid,
    pub payee_id: Uuid,
    pub campaign_id: Uuid,
    pub price: Decimal,
    /// Deadline for paying; the deal expires if it is still unpaid by then.
    pub expires_at: Option<PrimitiveDateTime>,
    pub actor: Uuid,
}

/// The payee's verdict on a submitted creative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve { post_at: PrimitiveDateTime },
    RequestEdits { reason: String },
}

pub struct DealActions {
    store: Arc<dyn DealStore>,
    clock: Arc<dyn Clock>,
    deposit_address: String,
    payment_window: Duration,
}

impl DealActions {
    pub fn new(
        store: Arc<dyn DealStore>,
        clock: Arc<dyn Clock>,
        deposit_address: String,
        payment_window: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            deposit_address,
            payment_window,
        }
    }

    async fn load(&self, deal_id: Uuid) -> Result<DealContext, ActionError> {
        self.store
            .deal_context(deal_id)
            .await?
            .ok_or(ActionError::NotFound {
                entity: "deal",
                id: deal_id,
            })
    }

    async fn chat_id(&self, user_id: Uuid) -> Result<i64, ActionError> {
        self.store
            .user_chat_id(user_id)
            .await?
            .ok_or(ActionError::NotFound {
                entity: "user",
                id: user_id,
            })
    }

    pub async fn accept_proposal(&self, proposal: ProposalAcceptance) -> Result<Uuid, ActionError> {
        let price = TonAmount::new(proposal.price)
            .map_err(|e| ActionError::ValidationFailed(e.to_string()))?;
        if price.is_zero() {
            return Err(ActionError::ValidationFailed(
                "price must be positive".to_string(),
            ));
        }
        if proposal.listing_id.is_some() == proposal.channel_id.is_some() {
            return Err(ActionError::ValidationFailed(
                "exactly one of listing or channel must be set".to_string(),
            ));
        }
        if proposal.advertiser_id == proposal.payee_id {
            return Err(ActionError::ValidationFailed(
                "advertiser and payee must differ".to_string(),
            ));
        }

        let deal_id = Uuid::new_v4();
        if proposal.actor != proposal.advertiser_id && proposal.actor != proposal.payee_id {
            return Err(ActionError::Forbidden {
                actor: proposal.actor,
                deal_id,
                action: "accept",
            });
        }
        let advertiser_chat_id = self.chat_id(proposal.advertiser_id).await?;
        let payee_chat_id = self.chat_id(proposal.payee_id).await?;

        let now = self.clock.now();
        let mut unit = UnitOfWork::new();
        unit.push(Write::CreateDeal(NewDeal {
            id: deal_id,
            listing_id: proposal.listing_id,
            channel_id: proposal.channel_id,
            advertiser_id: proposal.advertiser_id,
            payee_id: proposal.payee_id,
            campaign_id: proposal.campaign_id,
            agreed_price: proposal.price,
            expires_at: proposal.expires_at,
            created_at: now,
        }))
        .event(NewDealEvent {
            deal_id,
            kind: DealEventKind::ProposalAccepted,
            from_status: None,
            to_status: Some(DealStatus::Agreed),
            actor_id: Some(proposal.actor),
            payload: Some(json!({ "price": proposal.price })),
            created_at: now,
        })
        .notify(
            &OutboxEnvelope::new(
                advertiser_chat_id,
                Notification::ProposalAccepted { deal_id, price },
            ),
            now,
        )?
        .notify(
            &OutboxEnvelope::new(payee_chat_id, Notification::DealCreated { deal_id, price }),
            now,
        )?;
        self.store.commit(unit).await?;

        info!(deal_id = %deal_id, price = %price, "Deal created");
        Ok(deal_id)
    }

    /// Open an invoice for an agreed deal. Returns the created payment.
    pub async fn request_payment(
        &self,
        deal_id: Uuid,
        actor: Uuid,
    ) -> Result<NewPayment, ActionError> {
        let ctx = self.load(deal_id).await?;
        let deal = &ctx.deal;
        authorize(actor, deal.advertiser_id, deal_id, "pay for")?;

        let now = self.clock.now();
        let expires_at = now + self.payment_window;
        let amount = TonAmount::new(deal.agreed_price)?;
        let payment_id = Uuid::new_v4();
        let invoice_id = payment_id.to_string();
        let payment = NewPayment {
            id: payment_id,
            deal_id,
            payment_uri: payment_uri(&self.deposit_address, amount, &invoice_id)?,
            invoice_id,
            amount: deal.agreed_price,
            currency: TON.to_string(),
            created_at: now,
            expires_at,
        };

        let mut unit = UnitOfWork::new();
        unit.transition(
            deal_id,
            deal.status,
            DealStatus::AwaitingPayment,
            now,
            DealStamps {
                escrow_address: Some(self.deposit_address.clone()),
                expires_at: Some(expires_at),
                ..DealStamps::default()
            },
        )?
        .push(Write::CreatePayment(payment.clone()))
        .event(
            NewDealEvent::transition(
                deal_id,
                DealEventKind::PaymentRequested,
                deal.status,
                DealStatus::AwaitingPayment,
                now,
            )
            .with_actor(actor)
            .with_payload(json!({ "payment_id": payment_id, "invoice_id": payment.invoice_id })),
        );
        self.store.commit(unit).await?;

        info!(deal_id = %deal_id, payment_id = %payment_id, amount = %amount, "Payment requested");
        Ok(payment)
    }

    /// Submit (or resubmit after edits) the creative for review.
    pub async fn submit_creative(
        &self,
        deal_id: Uuid,
        actor: Uuid,
        text: Option<String>,
        media: Vec<CreativeMedia>,
    ) -> Result<(), ActionError> {
        if media.len() > 1 {
            return Err(ActionError::ValidationFailed(
                "a creative carries at most one media item".to_string(),
            ));
        }
        let creative = Creative {
            text: text.filter(|t| !t.trim().is_empty()),
            media: media.into_iter().next(),
        };
        if creative.is_empty() {
            return Err(ActionError::ValidationFailed(
                "creative has neither text nor media".to_string(),
            ));
        }

        let ctx = self.load(deal_id).await?;
        let deal = &ctx.deal;
        authorize(actor, deal.advertiser_id, deal_id, "submit a creative for")?;

        let now = self.clock.now();
        let mut unit = UnitOfWork::new();
        if deal.status == DealStatus::Paid {
            unit.transition(
                deal_id,
                DealStatus::Paid,
                DealStatus::CreativeDraft,
                now,
                DealStamps::default(),
            )?;
            unit.transition(
                deal_id,
                DealStatus::CreativeDraft,
                DealStatus::CreativeReview,
                now,
                DealStamps::default(),
            )?;
        } else {
            unit.transition(
                deal_id,
                deal.status,
                DealStatus::CreativeReview,
                now,
                DealStamps::default(),
            )?;
        }
        unit.push(Write::UpdateCreative {
            deal_id,
            creative,
            at: now,
        })
        .event(
            NewDealEvent::transition(
                deal_id,
                DealEventKind::CreativeSubmitted,
                deal.status,
                DealStatus::CreativeReview,
                now,
            )
            .with_actor(actor),
        )
        .notify(
            &OutboxEnvelope::new(
                ctx.parties.payee_chat_id,
                Notification::CreativeSubmitted { deal_id },
            ),
            now,
        )?;
        self.store.commit(unit).await?;

        info!(deal_id = %deal_id, "Creative submitted");
        Ok(())
    }

    pub async fn review_creative(
        &self,
        deal_id: Uuid,
        actor: Uuid,
        decision: ReviewDecision,
    ) -> Result<(), ActionError> {
        let ctx = self.load(deal_id).await?;
        let deal = &ctx.deal;
        authorize(actor, deal.payee_id, deal_id, "review the creative of")?;

        let now = self.clock.now();
        let advertiser = ctx.parties.advertiser_chat_id;
        let mut unit = UnitOfWork::new();
        match decision {
            ReviewDecision::Approve { post_at } => {
                unit.transition(
                    deal_id,
                    deal.status,
                    DealStatus::Scheduled,
                    now,
                    DealStamps {
                        scheduled_post_time: Some(post_at),
                        ..DealStamps::default()
                    },
                )?
                .event(
                    NewDealEvent::transition(
                        deal_id,
                        DealEventKind::CreativeApproved,
                        deal.status,
                        DealStatus::Scheduled,
                        now,
                    )
                    .with_actor(actor)
                    .with_payload(json!({ "scheduled_post_time": unix(post_at) })),
                )
                .notify(
                    &OutboxEnvelope::new(advertiser, Notification::CreativeApproved { deal_id }),
                    now,
                )?
                .notify(
                    &OutboxEnvelope::new(
                        advertiser,
                        Notification::PostScheduled {
                            deal_id,
                            scheduled_at: unix(post_at),
                        },
                    ),
                    now,
                )?;
                self.store.commit(unit).await?;
                info!(deal_id = %deal_id, post_at = %post_at, "Creative approved");
            }
            ReviewDecision::RequestEdits { reason } => {
                let reason = reason.trim().to_string();
                if reason.is_empty() {
                    return Err(ActionError::ValidationFailed(
                        "an edit request needs a reason".to_string(),
                    ));
                }
                unit.transition(
                    deal_id,
                    deal.status,
                    DealStatus::CreativeDraft,
                    now,
                    DealStamps {
                        rejection_reason: Some(reason.clone()),
                        ..DealStamps::default()
                    },
                )?
                .event(
                    NewDealEvent::transition(
                        deal_id,
                        DealEventKind::CreativeRejected,
                        deal.status,
                        DealStatus::CreativeDraft,
                        now,
                    )
                    .with_actor(actor)
                    .with_payload(json!({ "reason": reason })),
                )
                .notify(
                    &OutboxEnvelope::new(
                        advertiser,
                        Notification::CreativeEditsRequested { deal_id, reason },
                    ),
                    now,
                )?;
                self.store.commit(unit).await?;
                info!(deal_id = %deal_id, "Creative edits requested");
            }
        }
        Ok(())
    }

    /// Call a deal off before anything is posted. Funds held in escrow go back.
    pub async fn cancel_deal(
        &self,
        deal_id: Uuid,
        actor: Uuid,
        reason: Option<String>,
    ) -> Result<(), ActionError> {
        let ctx = self.load(deal_id).await?;
        let deal = &ctx.deal;
        if actor != deal.advertiser_id && actor != deal.payee_id {
            return Err(ActionError::Forbidden {
                actor,
                deal_id,
                action: "cancel",
            });
        }
        if !can_cancel(deal.status) {
            return Err(TransitionError::InvalidTransition {
                from: deal.status,
                to: DealStatus::Cancelled,
            }
            .into());
        }

        let now = self.clock.now();
        let funded = deal.status.is_funded();
        let mut unit = UnitOfWork::new();
        unit.transition(
            deal_id,
            deal.status,
            DealStatus::Cancelled,
            now,
            DealStamps {
                escrow_refunded_at: funded.then_some(now),
                ..DealStamps::default()
            },
        )?;
        if funded {
            self.reverse_escrow(&mut unit, &ctx, now).await?;
        } else if deal.status == DealStatus::AwaitingPayment {
            unit.push(Write::SetPaymentStatus {
                deal_id,
                from: PaymentStatus::Pending,
                to: PaymentStatus::Cancelled,
            });
        }
        let cancelled = Notification::DealCancelled {
            deal_id,
            reason: reason.clone(),
        };
        unit.event(
            NewDealEvent::transition(
                deal_id,
                DealEventKind::Cancelled,
                deal.status,
                DealStatus::Cancelled,
                now,
            )
            .with_actor(actor)
            .with_payload(json!({ "reason": reason })),
        )
        .notify(
            &OutboxEnvelope::new(ctx.parties.advertiser_chat_id, cancelled.clone()),
            now,
        )?
        .notify(&OutboxEnvelope::new(ctx.parties.payee_chat_id, cancelled), now)?;
        self.store.commit(unit).await?;

        info!(deal_id = %deal_id, from = %deal.status, refunded = funded, "Deal cancelled");
        Ok(())
    }

    /// Return a paid deal's funds when it can no longer be cancelled.
    ///
    /// Only the payee can give the money back. The on-chain payout itself is
    /// left to the withdrawal flow.
    pub async fn refund_deal(
        &self,
        deal_id: Uuid,
        actor: Uuid,
        reason: Option<String>,
    ) -> Result<(), ActionError> {
        let ctx = self.load(deal_id).await?;
        let deal = &ctx.deal;
        authorize(actor, deal.payee_id, deal_id, "refund")?;
        if !deal.status.is_funded() || can_cancel(deal.status) {
            return Err(TransitionError::InvalidTransition {
                from: deal.status,
                to: DealStatus::Refunded,
            }
            .into());
        }

        let now = self.clock.now();
        let amount = TonAmount::new(deal.agreed_price)?;
        let mut unit = UnitOfWork::new();
        unit.transition(
            deal_id,
            deal.status,
            DealStatus::Refunded,
            now,
            DealStamps {
                escrow_refunded_at: Some(now),
                ..DealStamps::default()
            },
        )?;
        self.reverse_escrow(&mut unit, &ctx, now).await?;
        unit.event(
            NewDealEvent::transition(
                deal_id,
                DealEventKind::Refunded,
                deal.status,
                DealStatus::Refunded,
                now,
            )
            .with_actor(actor)
            .with_payload(json!({ "reason": reason })),
        )
        .notify(
            &OutboxEnvelope::new(
                ctx.parties.payee_chat_id,
                Notification::FundsRefunded { deal_id, amount },
            ),
            now,
        )?;
        self.store.commit(unit).await?;

        info!(deal_id = %deal_id, from = %deal.status, "Deal refunded");
        Ok(())
    }

    /// Queue the escrow side of a refund: unlock the payee's funds, mark the
    /// payment refunded and tell the advertiser.
    async fn reverse_escrow(
        &self,
        unit: &mut UnitOfWork,
        ctx: &DealContext,
        now: PrimitiveDateTime,
    ) -> Result<(), ActionError> {
        let deal = &ctx.deal;
        let amount = TonAmount::new(deal.agreed_price)?;
        let payment = self
            .store
            .payment_for_deal(deal.id)
            .await?
            .filter(|p| p.status == PaymentStatus::Confirmed);

        unit.push(Write::ReverseEscrow(EscrowMovement {
            user_id: deal.payee_id,
            currency: TON.to_string(),
            amount: deal.agreed_price,
            at: now,
        }))
        .push(Write::RecordLedger(NewEscrowTransaction {
            deal_id: deal.id,
            payment_id: payment.as_ref().map(|p| p.id),
            user_id: deal.payee_id,
            kind: EscrowTransactionKind::FundsRefunded,
            amount: deal.agreed_price,
            currency: TON.to_string(),
            tx_hash: payment.and_then(|p| p.tx_hash),
            created_at: now,
        }))
        .push(Write::SetPaymentStatus {
            deal_id: deal.id,
            from: PaymentStatus::Confirmed,
            to: PaymentStatus::Refunded,
        })
        .notify(
            &OutboxEnvelope::new(
                ctx.parties.advertiser_chat_id,
                Notification::FundsRefunded {
                    deal_id: deal.id,
                    amount,
                },
            ),
            now,
        )?;
        Ok(())
    }
}

fn authorize(
    actor: Uuid,
    expected: Uuid,
    deal_id: Uuid,
    action: &'static str,
) -> Result<(), ActionError> {
    if actor == expected {
        Ok(())
    } else {
        Err(ActionError::Forbidden {
            actor,
            deal_id,
            action,
        })
    }
}

fn unix(at: PrimitiveDateTime) -> i64 {
    at.assume_utc().unix_timestamp()
}
