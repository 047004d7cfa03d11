//! Persistence seam for the workers and deal actions.
//!
//! Reads go through [`DealStore`] / [`OutboxStore`]. Every write goes through a
//! [`UnitOfWork`]: an ordered list of typed writes that commits atomically or
//! not at all. Status changes carry the status the caller observed, and the
//! store refuses the whole unit if the row moved on in the meantime.

pub mod postgres;

#[cfg(test)]
pub mod memory;

pub use postgres::PgStore;

use crate::entities::{
    Creative, DealContext, DealEvent, DealStamps, DealStatus, DealTransition, EscrowBalance,
    EscrowTransaction,
    NewDeal, NewDealEvent, NewEscrowTransaction, NewOutboxMessage, NewPayment, OutboxMessage,
    Payment, PaymentConfirmation, PaymentStatus,
};
use crate::state_machine::{TransitionError, validate_transition};
use adeal_sdk::objects::OutboxEnvelope;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("deal {0} not found")]
    DealNotFound(Uuid),

    /// Optimistic guard: the deal is no longer in the status the caller saw.
    #[error("deal {deal_id} is {actual}, expected {expected}")]
    StatusConflict {
        deal_id: Uuid,
        expected: DealStatus,
        actual: DealStatus,
    },

    /// The transaction hash is already recorded on some payment.
    #[error("transaction {0} is already recorded")]
    DuplicateTransaction(String),

    #[error("invoice {0} already exists")]
    DuplicateInvoice(String),

    #[error("payment {0} is no longer pending")]
    PaymentNotPending(Uuid),

    #[error("not enough funds locked in deals for user {0}")]
    InsufficientLockedFunds(Uuid),
}

/// One write inside a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    CreateDeal(NewDeal),
    TransitionDeal(DealTransition),
    UpdateCreative {
        deal_id: Uuid,
        creative: Creative,
        at: PrimitiveDateTime,
    },
    CreatePayment(NewPayment),
    ConfirmPayment(PaymentConfirmation),
    SetPaymentStatus {
        deal_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// Earned but not yet withdrawable: `total_earned` and `locked` grow.
    LockEscrow(EscrowMovement),
    /// Settlement: `locked` shrinks, `available` grows.
    ReleaseEscrow(EscrowMovement),
    /// Refund: `locked` and `total_earned` shrink.
    ReverseEscrow(EscrowMovement),
    RecordLedger(NewEscrowTransaction),
    AppendEvent(NewDealEvent),
    Enqueue(NewOutboxMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowMovement {
    pub user_id: Uuid,
    pub currency: String,
    pub amount: Decimal,
    pub at: PrimitiveDateTime,
}

/// Writes that must become durable together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    writes: Vec<Write>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    /// Queue a status change after checking it against the transition table.
    pub fn transition(
        &mut self,
        deal_id: Uuid,
        from: DealStatus,
        to: DealStatus,
        at: PrimitiveDateTime,
        stamps: DealStamps,
    ) -> Result<&mut Self, TransitionError> {
        validate_transition(from, to)?;
        Ok(self.push(Write::TransitionDeal(DealTransition {
            deal_id,
            expected: from,
            to,
            at,
            stamps,
        })))
    }

    pub fn event(&mut self, event: NewDealEvent) -> &mut Self {
        self.push(Write::AppendEvent(event))
    }

    /// Queue a notification in the same transaction as the state it describes.
    pub fn notify(
        &mut self,
        envelope: &OutboxEnvelope,
        at: PrimitiveDateTime,
    ) -> Result<&mut Self, serde_json::Error> {
        let message = NewOutboxMessage::from_envelope(envelope, at)?;
        Ok(self.push(Write::Enqueue(message)))
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[async_trait]
pub trait DealStore: Send + Sync {
    async fn deal_context(&self, deal_id: Uuid) -> Result<Option<DealContext>, StoreError>;

    /// Audit timeline of a deal, oldest first.
    async fn deal_events(&self, deal_id: Uuid) -> Result<Vec<DealEvent>, StoreError>;

    async fn payment_for_deal(&self, deal_id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn user_chat_id(&self, user_id: Uuid) -> Result<Option<i64>, StoreError>;

    /// `Agreed` / `AwaitingPayment` deals with `expires_at <= now`.
    async fn expirable_deals(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<DealContext>, StoreError>;

    /// `Pending` payments with `expires_at > now`.
    async fn pending_payments(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError>;

    async fn is_transaction_recorded(&self, tx_hash: &str) -> Result<bool, StoreError>;

    /// `Scheduled` deals with `scheduled_post_time <= now`.
    async fn due_publications(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<DealContext>, StoreError>;

    /// `Posted` deals with a posted message whose campaign ended by `now`.
    async fn due_settlements(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<DealContext>, StoreError>;

    async fn escrow_balance(
        &self,
        user_id: Uuid,
        currency: &str,
    ) -> Result<Option<EscrowBalance>, StoreError>;

    /// Escrow ledger lines of a deal, oldest first.
    async fn deal_ledger(&self, deal_id: Uuid) -> Result<Vec<EscrowTransaction>, StoreError>;

    /// Apply every write of `unit` atomically.
    async fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` deliverable messages, oldest first, marking them
    /// `Processing`.
    async fn claim_outbox_batch(
        &self,
        now: PrimitiveDateTime,
        stale_before: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<OutboxMessage>, StoreError>;

    async fn mark_outbox_completed(
        &self,
        id: Uuid,
        at: PrimitiveDateTime,
    ) -> Result<(), StoreError>;

    /// `next_retry_at = None` dead-letters the message.
    async fn mark_outbox_failed(
        &self,
        id: Uuid,
        retry_count: i32,
        error: String,
        next_retry_at: Option<PrimitiveDateTime>,
    ) -> Result<(), StoreError>;
}
