//! Shared fixtures and fake collaborators for worker tests.

use crate::clients::{
    ChannelMessenger, MessengerError, Notifier, NotifyError, ObserverError, TransactionSource,
};
use crate::clock::ManualClock;
use crate::entities::{Deal, DealStatus, Payment, PaymentStatus};
use crate::matching::ObservedTransaction;
use crate::store::memory::MemoryStore;
use adeal_sdk::objects::OutboxEnvelope;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use time::PrimitiveDateTime;
use time::macros::datetime;
use uuid::Uuid;

pub const T0: PrimitiveDateTime = datetime!(2025-06-01 12:00);
pub const ADVERTISER_CHAT: i64 = 1001;
pub const PAYEE_CHAT: i64 = 2002;
pub const CHANNEL_CHAT: i64 = -100_3003;
pub const DEPOSIT_ADDRESS: &str = "UQdeposit";

pub fn ton(amount: i64) -> Decimal {
    Decimal::from(amount)
}

/// A store seeded with two parties, one channel and one campaign.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub advertiser_id: Uuid,
    pub payee_id: Uuid,
    pub channel_id: Uuid,
    pub campaign_id: Uuid,
}

impl Fixture {
    /// The campaign window ends one week after `T0`.
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let advertiser_id = store.add_user(ADVERTISER_CHAT);
        let payee_id = store.add_user(PAYEE_CHAT);
        let channel_id = store.add_channel(CHANNEL_CHAT);
        let campaign_id = store.add_campaign(T0 + time::Duration::days(7));
        Self {
            store,
            clock: Arc::new(ManualClock::new(T0)),
            advertiser_id,
            payee_id,
            channel_id,
            campaign_id,
        }
    }

    /// A 10 TON deal in `status`, not yet stored.
    pub fn deal(&self, status: DealStatus) -> Deal {
        Deal {
            id: Uuid::new_v4(),
            listing_id: None,
            channel_id: Some(self.channel_id),
            advertiser_id: self.advertiser_id,
            payee_id: self.payee_id,
            campaign_id: self.campaign_id,
            status,
            agreed_price: ton(10),
            scheduled_post_time: None,
            escrow_address: None,
            creative_text: None,
            creative_media_kind: None,
            creative_media_file_id: None,
            rejection_reason: None,
            posted_message_id: None,
            created_at: T0 - time::Duration::days(1),
            updated_at: T0 - time::Duration::days(1),
            posted_at: None,
            verified_at: None,
            expires_at: None,
            escrow_released_at: None,
            escrow_refunded_at: None,
        }
    }

    pub fn put(&self, deal: Deal) -> Deal {
        self.store.put_deal(deal.clone());
        deal
    }

    /// A pending payment for `deal` expecting its agreed price.
    pub fn put_pending_payment(&self, deal: &Deal, invoice_id: &str) -> Payment {
        let payment = Payment {
            id: Uuid::new_v4(),
            deal_id: deal.id,
            invoice_id: invoice_id.to_string(),
            payment_uri: format!("ton://transfer/{DEPOSIT_ADDRESS}?text={invoice_id}"),
            amount: deal.agreed_price,
            currency: crate::entities::TON.to_string(),
            status: PaymentStatus::Pending,
            tx_hash: None,
            payer_address: None,
            actual_amount: None,
            created_at: T0 - time::Duration::minutes(10),
            expires_at: T0 + time::Duration::hours(1),
            confirmed_at: None,
        };
        self.store.put_payment(payment.clone());
        payment
    }
}

pub fn incoming(hash: &str, comment: &str, nano: i64) -> ObservedTransaction {
    ObservedTransaction {
        hash: hash.to_string(),
        success: true,
        value: nano,
        comment: Some(comment.to_string()),
        source_address: Some("UQpayer".to_string()),
        timestamp: T0.assume_utc().unix_timestamp(),
    }
}

#[derive(Default)]
pub struct FakeTransactionSource {
    pub transactions: Mutex<Vec<ObservedTransaction>>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeTransactionSource {
    pub fn with(transactions: Vec<ObservedTransaction>) -> Self {
        Self {
            transactions: Mutex::new(transactions),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TransactionSource for FakeTransactionSource {
    async fn account_transactions(
        &self,
        _address: &str,
        limit: u32,
    ) -> Result<Vec<ObservedTransaction>, ObserverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ObserverError::RateLimited);
        }
        let transactions = self.transactions.lock().unwrap();
        Ok(transactions.iter().take(limit as usize).cloned().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub chat_id: i64,
    pub method: &'static str,
    /// Text for messages, file id for media.
    pub content: String,
    pub caption: Option<String>,
}

pub struct FakeMessenger {
    next_id: AtomicI64,
    pub sent: Mutex<Vec<Sent>>,
    pub deleted: Mutex<Vec<(i64, i64)>>,
    pub fail_send: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl Default for FakeMessenger {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(500),
            sent: Mutex::default(),
            deleted: Mutex::default(),
            fail_send: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }
}

impl FakeMessenger {
    fn record(
        &self,
        chat_id: i64,
        method: &'static str,
        content: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(MessengerError::Api("Bad Request: chat not found".to_string()));
        }
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            method,
            content: content.to_string(),
            caption: caption.map(str::to_string),
        });
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ChannelMessenger for FakeMessenger {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, MessengerError> {
        self.record(chat_id, "sendMessage", text, None)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError> {
        self.record(chat_id, "sendPhoto", file_id, caption)
    }

    async fn send_video(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError> {
        self.record(chat_id, "sendVideo", file_id, caption)
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError> {
        self.record(chat_id, "sendDocument", file_id, caption)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), MessengerError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(MessengerError::Api(
                "Bad Request: message can't be deleted".to_string(),
            ));
        }
        self.deleted.lock().unwrap().push((chat_id, message_id));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub delivered: Mutex<Vec<OutboxEnvelope>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn deliver(&self, envelope: &OutboxEnvelope) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MessengerError::Api("Too Many Requests".to_string()).into());
        }
        self.delivered.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}
