//! Postgres-backed store. One unit of work is one SQL transaction.

use super::{DealStore, OutboxStore, StoreError, UnitOfWork, Write};
use crate::entities::deal::{GetDealContext, GetDuePublications, GetDueSettlements, GetExpirableDeals};
use crate::entities::deal_event::GetDealEvents;
use crate::entities::escrow::{GetEscrowBalance, GetEscrowTransactionsForDeal};
use crate::entities::outbox_message::{ClaimOutboxBatch, MarkOutboxCompleted, MarkOutboxFailed};
use crate::entities::payment::{GetPaymentForDeal, GetPendingPayments, IsTransactionRecorded};
use crate::entities::user::GetUserChatId;
use crate::entities::{
    Deal, DealContext, DealEvent, EscrowBalance, EscrowTransaction, OutboxMessage, Payment,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgStore {
    db: DatabaseProcessor,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
        }
    }

    pub fn processor(&self) -> &DatabaseProcessor {
        &self.db
    }
}

async fn apply(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    write: Write,
) -> Result<(), StoreError> {
    match write {
        Write::CreateDeal(deal) => Deal::insert_tx(tx, &deal).await?,
        Write::TransitionDeal(transition) => {
            if Deal::transition_tx(tx, &transition).await? == 0 {
                return Err(match Deal::status_tx(tx, transition.deal_id).await? {
                    Some(actual) => StoreError::StatusConflict {
                        deal_id: transition.deal_id,
                        expected: transition.expected,
                        actual,
                    },
                    None => StoreError::DealNotFound(transition.deal_id),
                });
            }
        }
        Write::UpdateCreative {
            deal_id,
            creative,
            at,
        } => Deal::update_creative_tx(tx, deal_id, &creative, at).await?,
        Write::CreatePayment(payment) => match Payment::insert_tx(tx, &payment).await {
            Ok(()) => {}
            Err(sqlx::Error::Database(e))
                if e.constraint() == Some("payments_invoice_id_key") =>
            {
                return Err(StoreError::DuplicateInvoice(payment.invoice_id));
            }
            Err(e) => return Err(e.into()),
        },
        Write::ConfirmPayment(confirmation) => {
            if Payment::tx_hash_exists_tx(tx, &confirmation.tx_hash).await? {
                return Err(StoreError::DuplicateTransaction(confirmation.tx_hash));
            }
            match Payment::confirm_tx(tx, &confirmation).await {
                Ok(0) => return Err(StoreError::PaymentNotPending(confirmation.payment_id)),
                Ok(_) => {}
                // A concurrent confirmation won the race on the unique index.
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    return Err(StoreError::DuplicateTransaction(confirmation.tx_hash));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Write::SetPaymentStatus { deal_id, from, to } => {
            Payment::set_status_for_deal_tx(tx, deal_id, from, to).await?;
        }
        Write::LockEscrow(m) => {
            EscrowBalance::lock_tx(tx, m.user_id, &m.currency, m.amount, m.at).await?
        }
        Write::ReleaseEscrow(m) => {
            if EscrowBalance::release_tx(tx, m.user_id, &m.currency, m.amount, m.at).await? == 0 {
                return Err(StoreError::InsufficientLockedFunds(m.user_id));
            }
        }
        Write::ReverseEscrow(m) => {
            if EscrowBalance::reverse_tx(tx, m.user_id, &m.currency, m.amount, m.at).await? == 0 {
                return Err(StoreError::InsufficientLockedFunds(m.user_id));
            }
        }
        Write::RecordLedger(line) => EscrowTransaction::insert_tx(tx, &line).await?,
        Write::AppendEvent(event) => {
            DealEvent::insert_tx(tx, &event).await?;
        }
        Write::Enqueue(message) => OutboxMessage::enqueue_tx(tx, &message).await?,
    }
    Ok(())
}

#[async_trait]
impl DealStore for PgStore {
    async fn deal_context(&self, deal_id: Uuid) -> Result<Option<DealContext>, StoreError> {
        Ok(self.db.process(GetDealContext { deal_id }).await?)
    }

    async fn deal_events(&self, deal_id: Uuid) -> Result<Vec<DealEvent>, StoreError> {
        Ok(self.db.process(GetDealEvents { deal_id }).await?)
    }

    async fn payment_for_deal(&self, deal_id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.db.process(GetPaymentForDeal { deal_id }).await?)
    }

    async fn user_chat_id(&self, user_id: Uuid) -> Result<Option<i64>, StoreError> {
        Ok(self.db.process(GetUserChatId { user_id }).await?)
    }

    async fn expirable_deals(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<DealContext>, StoreError> {
        Ok(self.db.process(GetExpirableDeals { now, limit }).await?)
    }

    async fn pending_payments(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError> {
        Ok(self.db.process(GetPendingPayments { now, limit }).await?)
    }

    async fn is_transaction_recorded(&self, tx_hash: &str) -> Result<bool, StoreError> {
        Ok(self
            .db
            .process(IsTransactionRecorded {
                tx_hash: tx_hash.to_string(),
            })
            .await?)
    }

    async fn due_publications(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<DealContext>, StoreError> {
        Ok(self.db.process(GetDuePublications { now, limit }).await?)
    }

    async fn due_settlements(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<DealContext>, StoreError> {
        Ok(self.db.process(GetDueSettlements { now, limit }).await?)
    }

    async fn escrow_balance(
        &self,
        user_id: Uuid,
        currency: &str,
    ) -> Result<Option<EscrowBalance>, StoreError> {
        Ok(self
            .db
            .process(GetEscrowBalance {
                user_id,
                currency: currency.to_string(),
            })
            .await?)
    }

    async fn deal_ledger(&self, deal_id: Uuid) -> Result<Vec<EscrowTransaction>, StoreError> {
        Ok(self
            .db
            .process(GetEscrowTransactionsForDeal { deal_id })
            .await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:CommitUnitOfWork")]
    async fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        for write in unit.into_writes() {
            // Dropping `tx` on error rolls everything back.
            apply(&mut tx, write).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn claim_outbox_batch(
        &self,
        now: PrimitiveDateTime,
        stale_before: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        Ok(self
            .db
            .process(ClaimOutboxBatch {
                now,
                stale_before,
                limit,
            })
            .await?)
    }

    async fn mark_outbox_completed(
        &self,
        id: Uuid,
        at: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        Ok(self.db.process(MarkOutboxCompleted { id, at }).await?)
    }

    async fn mark_outbox_failed(
        &self,
        id: Uuid,
        retry_count: i32,
        error: String,
        next_retry_at: Option<PrimitiveDateTime>,
    ) -> Result<(), StoreError> {
        Ok(self
            .db
            .process(MarkOutboxFailed {
                id,
                retry_count,
                error,
                next_retry_at,
            })
            .await?)
    }
}
