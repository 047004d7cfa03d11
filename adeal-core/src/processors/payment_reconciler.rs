//! PaymentReconciler.
//!
//! Polls the deposit address once per tick and settles pending payments whose
//! invoice reference shows up in an incoming transfer. Each confirmation
//! (payment, deal status, escrow lock, ledger line, event, notifications) is
//! one unit of work.

use super::runner::{Reconciler, TickReport, WorkerError};
use crate::clients::TransactionSource;
use crate::clock::Clock;
use crate::entities::{
    DealEventKind, DealStamps, DealStatus, EscrowTransactionKind, NewDealEvent,
    NewEscrowTransaction, Payment, PaymentConfirmation, TON,
};
use crate::matching::{ExpectedTransfer, ObservedTransaction, find_match};
use crate::store::{DealStore, EscrowMovement, StoreError, UnitOfWork, Write};
use adeal_sdk::objects::{Notification, OutboxEnvelope, TonAmount};
use async_trait::async_trait;
use itertools::Itertools;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use time::PrimitiveDateTime;
use tracing::{debug, error, info, warn};

/// Outcome of trying to confirm one payment.
enum Confirmation {
    Confirmed,
    /// The transaction is already on some payment.
    AlreadyRecorded,
}

pub struct PaymentReconciler {
    store: Arc<dyn DealStore>,
    source: Arc<dyn TransactionSource>,
    clock: Arc<dyn Clock>,
    deposit_address: String,
    transaction_limit: u32,
    batch_size: i64,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn DealStore>,
        source: Arc<dyn TransactionSource>,
        clock: Arc<dyn Clock>,
        deposit_address: String,
        transaction_limit: u32,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            source,
            clock,
            deposit_address,
            transaction_limit,
            batch_size,
        }
    }

    async fn confirm(
        &self,
        payment: &Payment,
        transaction: &ObservedTransaction,
        now: PrimitiveDateTime,
    ) -> Result<Confirmation, WorkerError> {
        if self.store.is_transaction_recorded(&transaction.hash).await? {
            return Ok(Confirmation::AlreadyRecorded);
        }

        let ctx = self
            .store
            .deal_context(payment.deal_id)
            .await?
            .ok_or(StoreError::DealNotFound(payment.deal_id))?;
        let deal = &ctx.deal;
        if deal.status != DealStatus::AwaitingPayment {
            return Err(StoreError::StatusConflict {
                deal_id: deal.id,
                expected: DealStatus::AwaitingPayment,
                actual: deal.status,
            }
            .into());
        }

        let received = TonAmount::from_nano(transaction.value);
        let notification = Notification::PaymentReceived {
            deal_id: deal.id,
            amount: received,
            tx_hash: transaction.hash.clone(),
        };

        let mut unit = UnitOfWork::new();
        unit.push(Write::ConfirmPayment(PaymentConfirmation {
            payment_id: payment.id,
            tx_hash: transaction.hash.clone(),
            payer_address: transaction.source_address.clone(),
            actual_amount: received.as_decimal(),
            confirmed_at: now,
        }))
        .transition(
            deal.id,
            DealStatus::AwaitingPayment,
            DealStatus::Paid,
            now,
            DealStamps::default(),
        )?
        .push(Write::LockEscrow(EscrowMovement {
            user_id: deal.payee_id,
            currency: TON.to_string(),
            amount: deal.agreed_price,
            at: now,
        }))
        .push(Write::RecordLedger(NewEscrowTransaction {
            deal_id: deal.id,
            payment_id: Some(payment.id),
            user_id: deal.payee_id,
            kind: EscrowTransactionKind::PaymentReceived,
            amount: deal.agreed_price,
            currency: TON.to_string(),
            tx_hash: Some(transaction.hash.clone()),
            created_at: now,
        }))
        .event(
            NewDealEvent::transition(
                deal.id,
                DealEventKind::PaymentConfirmed,
                DealStatus::AwaitingPayment,
                DealStatus::Paid,
                now,
            )
            .with_payload(json!({
                "payment_id": payment.id,
                "tx_hash": transaction.hash,
                "actual_amount": received.as_decimal().to_string(),
            })),
        )
        .notify(
            &OutboxEnvelope::new(ctx.parties.advertiser_chat_id, notification.clone()),
            now,
        )?
        .notify(&OutboxEnvelope::new(ctx.parties.payee_chat_id, notification), now)?;

        self.store.commit(unit).await?;
        Ok(Confirmation::Confirmed)
    }
}

#[async_trait]
impl Reconciler for PaymentReconciler {
    fn name(&self) -> &'static str {
        "payment_reconciler"
    }

    async fn tick(&self) -> Result<TickReport, WorkerError> {
        let now = self.clock.now();
        let payments = self.store.pending_payments(now, self.batch_size).await?;
        if payments.is_empty() {
            debug!("No pending payments");
            return Ok(TickReport::default());
        }

        // A failed poll abandons the tick before anything is written.
        let transactions: Vec<ObservedTransaction> = self
            .source
            .account_transactions(&self.deposit_address, self.transaction_limit)
            .await?
            .into_iter()
            .unique_by(|t| t.hash.clone())
            .collect();
        debug!(
            pending = payments.len(),
            transactions = transactions.len(),
            "Matching pending payments"
        );

        let mut consumed: HashSet<String> = HashSet::new();
        let mut report = TickReport::default();
        for payment in &payments {
            let expected_amount = match TonAmount::new(payment.amount).and_then(|a| a.to_nano()) {
                Ok(amount) => amount,
                Err(e) => {
                    error!(payment_id = %payment.id, error = %e, "Payment amount is not representable in nanotons");
                    report.failed += 1;
                    continue;
                }
            };
            let expected = ExpectedTransfer {
                invoice_id: &payment.invoice_id,
                amount: expected_amount,
            };
            let Some(transaction) = find_match(expected, &transactions, &consumed) else {
                continue;
            };
            consumed.insert(transaction.hash.clone());

            match self.confirm(payment, transaction, now).await {
                Ok(Confirmation::Confirmed) => {
                    info!(
                        payment_id = %payment.id,
                        deal_id = %payment.deal_id,
                        tx_hash = %transaction.hash,
                        "Payment confirmed"
                    );
                    report.processed += 1;
                }
                Ok(Confirmation::AlreadyRecorded)
                | Err(WorkerError::Store(StoreError::DuplicateTransaction(_))) => {
                    debug!(tx_hash = %transaction.hash, "Transaction already recorded, skipping");
                    report.skipped += 1;
                }
                Err(WorkerError::Store(
                    e @ (StoreError::StatusConflict { .. } | StoreError::PaymentNotPending(_)),
                )) => {
                    warn!(payment_id = %payment.id, error = %e, "Payment no longer confirmable, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(payment_id = %payment.id, error = %e, "Failed to confirm payment");
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
    use crate::entities::PaymentStatus;
    use crate::testing::{DEPOSIT_ADDRESS, FakeTransactionSource, Fixture, incoming, ton};
    use std::sync::atomic::Ordering;

    const INVOICE: &str = "11111111-1111-1111-1111-111111111111";
    const TEN_TON: i64 = 10_000_000_000;

    fn reconciler(fx: &Fixture, source: Arc<FakeTransactionSource>) -> PaymentReconciler {
        PaymentReconciler::new(
            fx.store.clone(),
            source,
            fx.clock.clone(),
            DEPOSIT_ADDRESS.to_string(),
            100,
            20,
        )
    }

    #[tokio::test]
    async fn test_confirms_matching_payment() {
        let fx = Fixture::new();
        let deal = fx.put(fx.deal(DealStatus::AwaitingPayment));
        let payment = fx.put_pending_payment(&deal, INVOICE);
        let source = Arc::new(FakeTransactionSource::with(vec![incoming(
            "hash-1", INVOICE, TEN_TON,
        )]));

        let report = reconciler(&fx, source).tick().await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(fx.store.deal(deal.id).unwrap().status, DealStatus::Paid);

        let payments = fx.store.payments();
        let stored = &payments[0];
        assert_eq!(stored.id, payment.id);
        assert_eq!(stored.status, PaymentStatus::Confirmed);
        assert_eq!(stored.tx_hash.as_deref(), Some("hash-1"));
        assert_eq!(stored.payer_address.as_deref(), Some("UQpayer"));
        assert_eq!(stored.actual_amount, Some(ton(10)));

        let balance = fx.store.balance(fx.payee_id, TON).unwrap();
        assert_eq!(balance.total_earned, ton(10));
        assert_eq!(balance.locked_in_deals, ton(10));
        assert_eq!(balance.available, ton(0));
        assert!(balance.is_consistent());

        let ledger = fx.store.ledger();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, EscrowTransactionKind::PaymentReceived);

        let events = fx.store.events(deal.id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DealEventKind::PaymentConfirmed);
        assert_eq!(fx.store.outbox().len(), 2);
    }

    #[tokio::test]
    async fn test_overpayment_records_actual_amount() {
        let fx = Fixture::new();
        let deal = fx.put(fx.deal(DealStatus::AwaitingPayment));
        fx.put_pending_payment(&deal, INVOICE);
        let source = Arc::new(FakeTransactionSource::with(vec![incoming(
            "hash-1",
            INVOICE,
            TEN_TON + 500_000_000,
        )]));

        reconciler(&fx, source).tick().await.unwrap();

        let payments = fx.store.payments();
        let stored = &payments[0];
        assert_eq!(stored.actual_amount, Some("10.5".parse().unwrap()));
        // Escrow locks the agreed price, not the overpayment.
        let balance = fx.store.balance(fx.payee_id, TON).unwrap();
        assert_eq!(balance.locked_in_deals, ton(10));
    }

    #[tokio::test]
    async fn test_underpayment_leaves_payment_pending() {
        let fx = Fixture::new();
        let deal = fx.put(fx.deal(DealStatus::AwaitingPayment));
        fx.put_pending_payment(&deal, INVOICE);
        let source = Arc::new(FakeTransactionSource::with(vec![incoming(
            "hash-1",
            INVOICE,
            TEN_TON - 1,
        )]));

        let report = reconciler(&fx, source).tick().await.unwrap();

        assert!(report.is_idle());
        assert_eq!(fx.store.payments()[0].status, PaymentStatus::Pending);
        assert!(fx.store.events(deal.id).is_empty());
    }

    #[tokio::test]
    async fn test_replaying_same_transactions_confirms_once() {
        let fx = Fixture::new();
        let deal = fx.put(fx.deal(DealStatus::AwaitingPayment));
        fx.put_pending_payment(&deal, INVOICE);
        let source = Arc::new(FakeTransactionSource::with(vec![incoming(
            "hash-1", INVOICE, TEN_TON,
        )]));
        let reconciler = reconciler(&fx, source);

        reconciler.tick().await.unwrap();
        let second = reconciler.tick().await.unwrap();

        assert!(second.is_idle());
        assert_eq!(fx.store.events(deal.id).len(), 1);
        assert_eq!(fx.store.ledger().len(), 1);
        assert_eq!(
            fx.store.balance(fx.payee_id, TON).unwrap().locked_in_deals,
            ton(10)
        );
    }

    #[tokio::test]
    async fn test_hash_already_on_another_payment_is_skipped() {
        let fx = Fixture::new();
        let earlier = fx.put(fx.deal(DealStatus::Paid));
        let mut recorded = fx.put_pending_payment(&earlier, "old-invoice");
        recorded.status = PaymentStatus::Confirmed;
        recorded.tx_hash = Some("hash-1".to_string());
        fx.store.put_payment(recorded);

        let deal = fx.put(fx.deal(DealStatus::AwaitingPayment));
        fx.put_pending_payment(&deal, INVOICE);
        let source = Arc::new(FakeTransactionSource::with(vec![incoming(
            "hash-1", INVOICE, TEN_TON,
        )]));

        let report = reconciler(&fx, source).tick().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(
            fx.store.deal(deal.id).unwrap().status,
            DealStatus::AwaitingPayment
        );
        assert!(fx.store.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_pays_only_the_invoice_it_names() {
        let fx = Fixture::new();
        let first = fx.put(fx.deal(DealStatus::AwaitingPayment));
        let second = fx.put(fx.deal(DealStatus::AwaitingPayment));
        let paid = fx.put_pending_payment(&first, INVOICE);
        let open = fx.put_pending_payment(&second, "22222222-2222-2222-2222-222222222222");
        let source = Arc::new(FakeTransactionSource::with(vec![incoming(
            "hash-1", INVOICE, TEN_TON,
        )]));

        let report = reconciler(&fx, source).tick().await.unwrap();

        assert_eq!(report.processed, 1);
        let payments = fx.store.payments();
        let status = |id: uuid::Uuid| payments.iter().find(|p| p.id == id).unwrap().status;
        assert_eq!(status(paid.id), PaymentStatus::Confirmed);
        assert_eq!(status(open.id), PaymentStatus::Pending);
        assert_eq!(fx.store.deal(first.id).unwrap().status, DealStatus::Paid);
        assert_eq!(
            fx.store.deal(second.id).unwrap().status,
            DealStatus::AwaitingPayment
        );
    }

    #[tokio::test]
    async fn test_deal_moved_on_is_skipped_without_writes() {
        let fx = Fixture::new();
        let deal = fx.put(fx.deal(DealStatus::Cancelled));
        fx.put_pending_payment(&deal, INVOICE);
        let source = Arc::new(FakeTransactionSource::with(vec![incoming(
            "hash-1", INVOICE, TEN_TON,
        )]));

        let report = reconciler(&fx, source).tick().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(fx.store.payments()[0].status, PaymentStatus::Pending);
        assert!(fx.store.balance(fx.payee_id, TON).is_none());
    }

    #[tokio::test]
    async fn test_poll_failure_aborts_tick() {
        let fx = Fixture::new();
        let deal = fx.put(fx.deal(DealStatus::AwaitingPayment));
        fx.put_pending_payment(&deal, INVOICE);
        let source = Arc::new(FakeTransactionSource::default());
        source.fail.store(true, Ordering::SeqCst);

        let result = reconciler(&fx, source).tick().await;

        assert!(matches!(result, Err(WorkerError::Observer(_))));
        assert_eq!(fx.store.payments()[0].status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_no_pending_payments_skips_poll() {
        let fx = Fixture::new();
        let source = Arc::new(FakeTransactionSource::default());

        reconciler(&fx, source.clone()).tick().await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
