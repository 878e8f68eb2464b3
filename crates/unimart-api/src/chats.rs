use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::debug;

use unimart_types::api::Claims;

use crate::state::AppState;

/// The caller's unified chat list. Failing sources are skipped, so this
/// never errors once the caller is authenticated.
pub async fn list_chats(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> impl IntoResponse {
    let chats = state.aggregator.aggregate(claims.sub).await;
    debug!("{} has {} chats", claims.sub, chats.len());
    Json(chats)
}
