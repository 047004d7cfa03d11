use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

use super::{AdminApiError, event_to_admin_response};

/// `GET /deals/{deal_id}/events`: the audit timeline, oldest first.
pub async fn list_deal_events(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(deal_id): Path<Uuid>,
) -> Result<impl IntoResponse, AdminApiError> {
    if state.store.deal_context(deal_id).await?.is_none() {
        return Err(AdminApiError::NotFound);
    }
    let events = state.store.deal_events(deal_id).await?;

    let response: Vec<_> = events.iter().map(event_to_admin_response).collect();
    Ok(Json(response))
}
