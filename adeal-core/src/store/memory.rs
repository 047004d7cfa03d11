//! In-memory store for tests.
//!
//! Mirrors the Postgres semantics: a unit of work is applied to a copy of the
//! state and only swapped in when every write succeeded.

use super::{DealStore, OutboxStore, StoreError, UnitOfWork, Write};
use crate::entities::{
    Deal, DealContext, DealEvent, DealParties, DealStatus, EscrowBalance, EscrowTransaction,
    OutboxMessage, OutboxStatus, Payment, PaymentStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct State {
    /// user id -> telegram chat id
    users: HashMap<Uuid, i64>,
    /// channel id -> telegram chat id
    channels: HashMap<Uuid, i64>,
    /// listing id -> channel id
    listings: HashMap<Uuid, Uuid>,
    /// campaign id -> schedule end
    campaigns: HashMap<Uuid, PrimitiveDateTime>,
    deals: HashMap<Uuid, Deal>,
    payments: Vec<Payment>,
    events: Vec<DealEvent>,
    balances: HashMap<(Uuid, String), EscrowBalance>,
    ledger: Vec<EscrowTransaction>,
    outbox: Vec<OutboxMessage>,
    next_event_id: i64,
    next_ledger_id: i64,
}

impl State {
    fn context(&self, deal: &Deal) -> Option<DealContext> {
        let channel_id = deal
            .channel_id
            .or_else(|| deal.listing_id.and_then(|l| self.listings.get(&l).copied()))?;
        Some(DealContext {
            deal: deal.clone(),
            parties: DealParties {
                advertiser_chat_id: *self.users.get(&deal.advertiser_id)?,
                payee_chat_id: *self.users.get(&deal.payee_id)?,
                channel_chat_id: *self.channels.get(&channel_id)?,
            },
        })
    }

    fn contexts<F, K>(&self, filter: F, sort_key: K, limit: i64) -> Vec<DealContext>
    where
        F: Fn(&Deal) -> bool,
        K: Fn(&Deal) -> Option<PrimitiveDateTime>,
    {
        let mut deals: Vec<&Deal> = self.deals.values().filter(|d| filter(d)).collect();
        deals.sort_by_key(|d| (sort_key(d), d.created_at, d.id));
        deals
            .into_iter()
            .filter_map(|d| self.context(d))
            .take(limit.max(0) as usize)
            .collect()
    }

    fn apply(&mut self, write: Write) -> Result<(), StoreError> {
        match write {
            Write::CreateDeal(new) => {
                self.deals.insert(
                    new.id,
                    Deal {
                        id: new.id,
                        listing_id: new.listing_id,
                        channel_id: new.channel_id,
                        advertiser_id: new.advertiser_id,
                        payee_id: new.payee_id,
                        campaign_id: new.campaign_id,
                        status: DealStatus::Agreed,
                        agreed_price: new.agreed_price,
                        scheduled_post_time: None,
                        escrow_address: None,
                        creative_text: None,
                        creative_media_kind: None,
                        creative_media_file_id: None,
                        rejection_reason: None,
                        posted_message_id: None,
                        created_at: new.created_at,
                        updated_at: new.created_at,
                        posted_at: None,
                        verified_at: None,
                        expires_at: new.expires_at,
                        escrow_released_at: None,
                        escrow_refunded_at: None,
                    },
                );
            }
            Write::TransitionDeal(transition) => {
                let deal = self
                    .deals
                    .get_mut(&transition.deal_id)
                    .ok_or(StoreError::DealNotFound(transition.deal_id))?;
                if deal.status != transition.expected {
                    return Err(StoreError::StatusConflict {
                        deal_id: deal.id,
                        expected: transition.expected,
                        actual: deal.status,
                    });
                }
                let stamps = transition.stamps;
                deal.status = transition.to;
                deal.updated_at = transition.at;
                deal.scheduled_post_time = stamps.scheduled_post_time.or(deal.scheduled_post_time);
                deal.escrow_address = stamps.escrow_address.or(deal.escrow_address.take());
                deal.expires_at = stamps.expires_at.or(deal.expires_at);
                deal.rejection_reason = stamps.rejection_reason.or(deal.rejection_reason.take());
                deal.posted_at = stamps.posted_at.or(deal.posted_at);
                deal.posted_message_id = stamps.posted_message_id.or(deal.posted_message_id);
                deal.verified_at = stamps.verified_at.or(deal.verified_at);
                deal.escrow_released_at = stamps.escrow_released_at.or(deal.escrow_released_at);
                deal.escrow_refunded_at = stamps.escrow_refunded_at.or(deal.escrow_refunded_at);
            }
            Write::UpdateCreative {
                deal_id,
                creative,
                at,
            } => {
                if let Some(deal) = self.deals.get_mut(&deal_id) {
                    deal.creative_text = creative.text;
                    deal.creative_media_kind = creative.media.as_ref().map(|m| m.kind);
                    deal.creative_media_file_id = creative.media.map(|m| m.file_id);
                    deal.rejection_reason = None;
                    deal.updated_at = at;
                }
            }
            Write::CreatePayment(new) => {
                if self.payments.iter().any(|p| p.invoice_id == new.invoice_id) {
                    return Err(StoreError::DuplicateInvoice(new.invoice_id));
                }
                self.payments.push(Payment {
                    id: new.id,
                    deal_id: new.deal_id,
                    invoice_id: new.invoice_id,
                    payment_uri: new.payment_uri,
                    amount: new.amount,
                    currency: new.currency,
                    status: PaymentStatus::Pending,
                    tx_hash: None,
                    payer_address: None,
                    actual_amount: None,
                    created_at: new.created_at,
                    expires_at: new.expires_at,
                    confirmed_at: None,
                });
            }
            Write::ConfirmPayment(confirmation) => {
                if self
                    .payments
                    .iter()
                    .any(|p| p.tx_hash.as_deref() == Some(confirmation.tx_hash.as_str()))
                {
                    return Err(StoreError::DuplicateTransaction(confirmation.tx_hash));
                }
                let payment = self
                    .payments
                    .iter_mut()
                    .find(|p| p.id == confirmation.payment_id && p.status == PaymentStatus::Pending)
                    .ok_or(StoreError::PaymentNotPending(confirmation.payment_id))?;
                payment.status = PaymentStatus::Confirmed;
                payment.tx_hash = Some(confirmation.tx_hash);
                payment.payer_address = confirmation.payer_address;
                payment.actual_amount = Some(confirmation.actual_amount);
                payment.confirmed_at = Some(confirmation.confirmed_at);
            }
            Write::SetPaymentStatus { deal_id, from, to } => {
                for payment in self
                    .payments
                    .iter_mut()
                    .filter(|p| p.deal_id == deal_id && p.status == from)
                {
                    payment.status = to;
                }
            }
            Write::LockEscrow(m) => {
                let balance = self
                    .balances
                    .entry((m.user_id, m.currency.clone()))
                    .or_insert_with(|| EscrowBalance::empty(m.user_id, &m.currency, m.at));
                balance.total_earned += m.amount;
                balance.locked_in_deals += m.amount;
                balance.updated_at = m.at;
            }
            Write::ReleaseEscrow(m) => {
                let balance = self
                    .balances
                    .get_mut(&(m.user_id, m.currency))
                    .filter(|b| b.locked_in_deals >= m.amount)
                    .ok_or(StoreError::InsufficientLockedFunds(m.user_id))?;
                balance.locked_in_deals -= m.amount;
                balance.available += m.amount;
                balance.updated_at = m.at;
            }
            Write::ReverseEscrow(m) => {
                let balance = self
                    .balances
                    .get_mut(&(m.user_id, m.currency))
                    .filter(|b| b.locked_in_deals >= m.amount)
                    .ok_or(StoreError::InsufficientLockedFunds(m.user_id))?;
                balance.locked_in_deals -= m.amount;
                balance.total_earned -= m.amount;
                balance.updated_at = m.at;
            }
            Write::RecordLedger(line) => {
                self.next_ledger_id += 1;
                self.ledger.push(EscrowTransaction {
                    id: self.next_ledger_id,
                    deal_id: line.deal_id,
                    payment_id: line.payment_id,
                    user_id: line.user_id,
                    kind: line.kind,
                    amount: line.amount,
                    currency: line.currency,
                    tx_hash: line.tx_hash,
                    created_at: line.created_at,
                });
            }
            Write::AppendEvent(event) => {
                self.next_event_id += 1;
                self.events.push(DealEvent {
                    id: self.next_event_id,
                    deal_id: event.deal_id,
                    kind: event.kind,
                    from_status: event.from_status,
                    to_status: event.to_status,
                    actor_id: event.actor_id,
                    payload: event.payload,
                    created_at: event.created_at,
                });
            }
            Write::Enqueue(message) => self.outbox.push(OutboxMessage {
                id: message.id,
                message_type: message.message_type,
                payload: message.payload,
                status: OutboxStatus::Pending,
                retry_count: 0,
                last_error: None,
                next_retry_at: None,
                processing_started_at: None,
                created_at: message.created_at,
                processed_at: None,
            }),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, chat_id: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().users.insert(id, chat_id);
        id
    }

    pub fn add_channel(&self, chat_id: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().channels.insert(id, chat_id);
        id
    }

    pub fn add_listing(&self, channel_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().listings.insert(id, channel_id);
        id
    }

    pub fn add_campaign(&self, schedule_end: PrimitiveDateTime) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().campaigns.insert(id, schedule_end);
        id
    }

    /// Insert a deal row as-is, whatever its status.
    pub fn put_deal(&self, deal: Deal) {
        self.state.lock().unwrap().deals.insert(deal.id, deal);
    }

    /// Insert a payment row, replacing the row with the same id.
    pub fn put_payment(&self, payment: Payment) {
        let mut state = self.state.lock().unwrap();
        state.payments.retain(|p| p.id != payment.id);
        assert!(
            state.payments.iter().all(|p| p.invoice_id != payment.invoice_id),
            "invoice {} already exists",
            payment.invoice_id
        );
        state.payments.push(payment);
    }

    pub fn put_balance(&self, balance: EscrowBalance) {
        let key = (balance.user_id, balance.currency.clone());
        self.state.lock().unwrap().balances.insert(key, balance);
    }

    /// Make every following commit fail with a database error.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn deal(&self, id: Uuid) -> Option<Deal> {
        self.state.lock().unwrap().deals.get(&id).cloned()
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.state.lock().unwrap().payments.clone()
    }

    pub fn events(&self, deal_id: Uuid) -> Vec<DealEvent> {
        let state = self.state.lock().unwrap();
        state
            .events
            .iter()
            .filter(|e| e.deal_id == deal_id)
            .cloned()
            .collect()
    }

    pub fn ledger(&self) -> Vec<EscrowTransaction> {
        self.state.lock().unwrap().ledger.clone()
    }

    pub fn outbox(&self) -> Vec<OutboxMessage> {
        self.state.lock().unwrap().outbox.clone()
    }

    pub fn balance(&self, user_id: Uuid, currency: &str) -> Option<EscrowBalance> {
        let state = self.state.lock().unwrap();
        state.balances.get(&(user_id, currency.to_string())).cloned()
    }
}

#[async_trait]
impl DealStore for MemoryStore {
    async fn deal_context(&self, deal_id: Uuid) -> Result<Option<DealContext>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.deals.get(&deal_id).and_then(|d| state.context(d)))
    }

    async fn deal_events(&self, deal_id: Uuid) -> Result<Vec<DealEvent>, StoreError> {
        let mut events = self.events(deal_id);
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    async fn payment_for_deal(&self, deal_id: Uuid) -> Result<Option<Payment>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .payments
            .iter()
            .filter(|p| p.deal_id == deal_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn user_chat_id(&self, user_id: Uuid) -> Result<Option<i64>, StoreError> {
        Ok(self.state.lock().unwrap().users.get(&user_id).copied())
    }

    async fn expirable_deals(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<DealContext>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.contexts(
            |d| {
                matches!(d.status, DealStatus::Agreed | DealStatus::AwaitingPayment)
                    && d.expires_at.is_some_and(|e| e <= now)
            },
            |d| d.expires_at,
            limit,
        ))
    }

    async fn pending_payments(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Pending && p.expires_at > now)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        payments.truncate(limit.max(0) as usize);
        Ok(payments)
    }

    async fn is_transaction_recorded(&self, tx_hash: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .payments
            .iter()
            .any(|p| p.tx_hash.as_deref() == Some(tx_hash)))
    }

    async fn due_publications(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<DealContext>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.contexts(
            |d| {
                d.status == DealStatus::Scheduled
                    && d.scheduled_post_time.is_some_and(|t| t <= now)
            },
            |d| d.scheduled_post_time,
            limit,
        ))
    }

    async fn due_settlements(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<DealContext>, StoreError> {
        let state = self.state.lock().unwrap();
        let campaigns = state.campaigns.clone();
        Ok(state.contexts(
            |d| {
                d.status == DealStatus::Posted
                    && d.posted_message_id.is_some()
                    && campaigns.get(&d.campaign_id).is_some_and(|end| *end <= now)
            },
            |d| campaigns.get(&d.campaign_id).copied(),
            limit,
        ))
    }

    async fn escrow_balance(
        &self,
        user_id: Uuid,
        currency: &str,
    ) -> Result<Option<EscrowBalance>, StoreError> {
        Ok(self.balance(user_id, currency))
    }

    async fn deal_ledger(&self, deal_id: Uuid) -> Result<Vec<EscrowTransaction>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .ledger
            .iter()
            .filter(|l| l.deal_id == deal_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut state = self.state.lock().unwrap();
        let mut next = state.clone();
        for write in unit.into_writes() {
            next.apply(write)?;
        }
        *state = next;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn claim_outbox_batch(
        &self,
        now: PrimitiveDateTime,
        stale_before: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut due: Vec<&mut OutboxMessage> = state
            .outbox
            .iter_mut()
            .filter(|m| match m.status {
                OutboxStatus::Pending => true,
                OutboxStatus::Failed => m.next_retry_at.is_some_and(|t| t <= now),
                OutboxStatus::Processing => {
                    m.processing_started_at.is_some_and(|t| t <= stale_before)
                }
                OutboxStatus::Completed | OutboxStatus::DeadLettered => false,
            })
            .collect();
        due.sort_by_key(|m| m.created_at);
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|m| {
                m.status = OutboxStatus::Processing;
                m.processing_started_at = Some(now);
                m.clone()
            })
            .collect())
    }

    async fn mark_outbox_completed(
        &self,
        id: Uuid,
        at: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(m) = state.outbox.iter_mut().find(|m| m.id == id) {
            m.status = OutboxStatus::Completed;
            m.processed_at = Some(at);
            m.processing_started_at = None;
        }
        Ok(())
    }

    async fn mark_outbox_failed(
        &self,
        id: Uuid,
        retry_count: i32,
        error: String,
        next_retry_at: Option<PrimitiveDateTime>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(m) = state.outbox.iter_mut().find(|m| m.id == id) {
            m.status = if next_retry_at.is_some() {
                OutboxStatus::Failed
            } else {
                OutboxStatus::DeadLettered
            };
            m.retry_count = retry_count;
            m.last_error = Some(error);
            m.next_retry_at = next_retry_at;
            m.processing_started_at = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DealEventKind, NewDealEvent, NewPayment, TON};
    use crate::testing::{Fixture, T0, ton};

    fn new_payment(deal_id: Uuid, invoice_id: &str) -> NewPayment {
        NewPayment {
            id: Uuid::new_v4(),
            deal_id,
            invoice_id: invoice_id.to_string(),
            payment_uri: format!("ton://transfer/addr?text={invoice_id}"),
            amount: ton(10),
            currency: TON.to_string(),
            created_at: T0,
            expires_at: T0 + time::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_duplicate_invoice_rejects_whole_unit() {
        let fx = Fixture::new();
        let first = fx.put(fx.deal(DealStatus::AwaitingPayment));
        let second = fx.put(fx.deal(DealStatus::AwaitingPayment));
        let mut unit = UnitOfWork::new();
        unit.push(Write::CreatePayment(new_payment(first.id, "invoice-1")));
        fx.store.commit(unit).await.unwrap();

        let mut unit = UnitOfWork::new();
        unit.event(NewDealEvent::transition(
            second.id,
            DealEventKind::PaymentRequested,
            DealStatus::Agreed,
            DealStatus::AwaitingPayment,
            T0,
        ))
        .push(Write::CreatePayment(new_payment(second.id, "invoice-1")));
        let result = fx.store.commit(unit).await;

        assert!(matches!(result, Err(StoreError::DuplicateInvoice(ref id)) if id == "invoice-1"));
        assert_eq!(fx.store.payments().len(), 1);
        assert!(fx.store.events(second.id).is_empty());
    }
}
