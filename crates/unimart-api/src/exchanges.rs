use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use unimart_db::models::{format_timestamp, parse_id};
use unimart_types::api::{Claims, MarkReadResponse};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

/// Mark a legacy exchange thread read for the caller. The path mirrors the
/// chat list's navigation target for exchange chats.
pub async fn mark_read(
    State(state): State<AppState>,
    Path((exchange_id, other_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let exchange = exchange_id.to_string();
    let other = other_id.to_string();
    let viewer = claims.sub.to_string();
    let stamp = format_timestamp(Utc::now());

    let ids = blocking(move || {
        if !db.has_exchange_thread(&exchange, &other, &viewer)? {
            return Ok(None);
        }
        db.mark_exchange_read(&exchange, &other, &viewer, &stamp).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("exchange chat"))?;

    let updated = ids
        .iter()
        .map(|id| parse_id(id))
        .collect::<anyhow::Result<Vec<Uuid>>>()?;
    debug!("{} read {} exchange messages in {}", claims.sub, updated.len(), exchange_id);

    Ok(Json(MarkReadResponse { updated }))
}
