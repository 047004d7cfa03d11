//! Admin API handlers.
//!
//! These endpoints require the `Adeal-Admin-Authorization` header with the
//! plaintext admin secret.
//!
//! # Endpoints
//!
//! - `GET /deals/{deal_id}`        – deal detail with its payment
//! - `GET /deals/{deal_id}/events` – audit timeline, oldest first
//! - `GET /deals/{deal_id}/ledger` – escrow movements, oldest first

use adeal_core::entities::{Deal, DealEvent, EscrowTransaction, Payment};
use adeal_core::store::StoreError;
use adeal_sdk::objects::admin::{
    AdminDealEventResponse, AdminDealResponse, AdminLedgerEntryResponse, AdminPaymentResponse,
};
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use time::PrimitiveDateTime;

use crate::state::AppState;

mod get_deal;
mod list_deal_events;
mod list_deal_ledger;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/deals/{deal_id}", get(get_deal::get_deal))
        .route(
            "/deals/{deal_id}/events",
            get(list_deal_events::list_deal_events),
        )
        .route(
            "/deals/{deal_id}/ledger",
            get(list_deal_ledger::list_deal_ledger),
        )
}

#[derive(Debug)]
pub(crate) enum AdminApiError {
    Store(StoreError),
    NotFound,
}

impl From<StoreError> for AdminApiError {
    fn from(e: StoreError) -> Self {
        AdminApiError::Store(e)
    }
}

impl IntoResponse for AdminApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AdminApiError::Store(e) => {
                tracing::error!(error = %e, "Admin API store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
            AdminApiError::NotFound => {
                (StatusCode::NOT_FOUND, "resource not found").into_response()
            }
        }
    }
}

fn unix(at: PrimitiveDateTime) -> i64 {
    at.assume_utc().unix_timestamp()
}

pub(crate) fn deal_to_admin_response(deal: &Deal, payment: Option<&Payment>) -> AdminDealResponse {
    AdminDealResponse {
        deal_id: deal.id,
        status: deal.status.into(),
        advertiser_id: deal.advertiser_id,
        payee_id: deal.payee_id,
        campaign_id: deal.campaign_id,
        price: deal.agreed_price,
        scheduled_post_time: deal.scheduled_post_time.map(unix),
        posted_message_id: deal.posted_message_id,
        created_at: unix(deal.created_at),
        updated_at: unix(deal.updated_at),
        payment: payment.map(|p| AdminPaymentResponse {
            payment_id: p.id,
            invoice_id: p.invoice_id.clone(),
            status: p.status.to_string(),
            amount: p.amount,
            actual_amount: p.actual_amount,
            tx_hash: p.tx_hash.clone(),
            expires_at: unix(p.expires_at),
            confirmed_at: p.confirmed_at.map(unix),
        }),
    }
}

pub(crate) fn event_to_admin_response(event: &DealEvent) -> AdminDealEventResponse {
    AdminDealEventResponse {
        id: event.id,
        kind: event.kind.into(),
        from_status: event.from_status.map(Into::into),
        to_status: event.to_status.map(Into::into),
        actor_id: event.actor_id,
        payload: event.payload.clone(),
        created_at: unix(event.created_at),
    }
}

pub(crate) fn ledger_to_admin_response(line: &EscrowTransaction) -> AdminLedgerEntryResponse {
    AdminLedgerEntryResponse {
        id: line.id,
        kind: line.kind.as_str().to_string(),
        user_id: line.user_id,
        payment_id: line.payment_id,
        amount: line.amount,
        currency: line.currency.clone(),
        tx_hash: line.tx_hash.clone(),
        created_at: unix(line.created_at),
    }
}
