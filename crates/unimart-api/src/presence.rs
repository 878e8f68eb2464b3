use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use unimart_realtime::connection::write_presence;
use unimart_types::api::{Claims, TypingRequest};
use unimart_types::events::RealtimeEvent;

use crate::conversations::authorize;
use crate::error::ApiError;
use crate::state::AppState;

/// Typing indicator over REST, for clients without a realtime connection.
pub async fn set_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TypingRequest>,
) -> Result<StatusCode, ApiError> {
    authorize(&state.db, conversation_id, claims.sub).await?;

    state.dispatcher.publish(RealtimeEvent::TypingUpdate {
        conversation_id,
        user_id: claims.sub,
        is_typing: req.is_typing,
    });
    write_presence(&state.db, claims.sub, true, req.is_typing.then_some(conversation_id)).await;

    Ok(StatusCode::NO_CONTENT)
}
