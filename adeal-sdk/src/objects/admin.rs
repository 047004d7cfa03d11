//! Admin API response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::deal::{DealEventKind, DealStatus};

/// Deal detail for the admin API, including its payment if one was requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminDealResponse {
    pub deal_id: Uuid,
    pub status: DealStatus,
    pub advertiser_id: Uuid,
    pub payee_id: Uuid,
    pub campaign_id: Uuid,
    pub price: rust_decimal::Decimal,
    pub scheduled_post_time: Option<i64>,
    pub posted_message_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub payment: Option<AdminPaymentResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminPaymentResponse {
    pub payment_id: Uuid,
    pub invoice_id: String,
    pub status: String,
    pub amount: rust_decimal::Decimal,
    pub actual_amount: Option<rust_decimal::Decimal>,
    pub tx_hash: Option<String>,
    pub expires_at: i64,
    pub confirmed_at: Option<i64>,
}

/// One line of a deal's audit timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminDealEventResponse {
    pub id: i64,
    pub kind: DealEventKind,
    pub from_status: Option<DealStatus>,
    pub to_status: Option<DealStatus>,
    pub actor_id: Option<Uuid>,
    pub payload: Option<serde_json::Value>,
    pub created_at: i64,
}

/// One escrow ledger line of a deal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminLedgerEntryResponse {
    pub id: i64,
    pub kind: String,
    pub user_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub amount: rust_decimal::Decimal,
    pub currency: String,
    pub tx_hash: Option<String>,
    pub created_at: i64,
}
