use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

use super::{AdminApiError, deal_to_admin_response};

/// `GET /deals/{deal_id}`: one deal and its latest payment.
pub async fn get_deal(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(deal_id): Path<Uuid>,
) -> Result<impl IntoResponse, AdminApiError> {
    let ctx = state
        .store
        .deal_context(deal_id)
        .await?
        .ok_or(AdminApiError::NotFound)?;
    let payment = state.store.payment_for_deal(deal_id).await?;

    Ok(Json(deal_to_admin_response(&ctx.deal, payment.as_ref())))
}
