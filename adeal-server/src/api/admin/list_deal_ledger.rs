use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

use super::{AdminApiError, ledger_to_admin_response};

/// `GET /deals/{deal_id}/ledger`: escrow lock, release and refund lines.
pub async fn list_deal_ledger(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(deal_id): Path<Uuid>,
) -> Result<impl IntoResponse, AdminApiError> {
    if state.store.deal_context(deal_id).await?.is_none() {
        return Err(AdminApiError::NotFound);
    }
    let ledger = state.store.deal_ledger(deal_id).await?;

    let response: Vec<_> = ledger.iter().map(ledger_to_admin_response).collect();
    Ok(Json(response))
}
