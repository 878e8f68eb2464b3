use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use unimart_db::models::{format_timestamp, parse_id, parse_timestamp};
use unimart_types::api::{Claims, MarkReadResponse, SendMessageRequest, UnreadCountResponse};
use unimart_types::events::RealtimeEvent;
use unimart_types::models::Message;

use crate::conversations::authorize;
use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub const MAX_CONTENT_LEN: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// `created_at` of the oldest message of the previous page.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state.db, conversation_id, claims.sub).await?;

    let before = query
        .before
        .as_deref()
        .map(|raw| parse_timestamp(raw).map(format_timestamp))
        .transpose()
        .map_err(|_| ApiError::BadRequest("invalid before cursor".into()))?;

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let limit = query.limit.clamp(1, 200);
    let rows = blocking(move || db.get_messages(&cid, limit, before.as_deref())).await?;

    let messages = rows
        .into_iter()
        .map(|row| row.into_model())
        .collect::<anyhow::Result<Vec<Message>>>()?;
    Ok(Json(messages))
}

/// Persist a message, refresh the conversation snapshot, and push it to
/// subscribers of the conversation.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("content is empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(ApiError::BadRequest(format!(
            "content exceeds {} characters",
            MAX_CONTENT_LEN
        )));
    }

    let conversation = authorize(&state.db, conversation_id, claims.sub).await?;
    let receiver_id = conversation
        .other_participant(claims.sub)
        .ok_or(ApiError::Forbidden)?;
    if req.receiver_id.is_some_and(|r| r != receiver_id) {
        return Err(ApiError::BadRequest("receiver is not the other participant".into()));
    }

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let sender = claims.sub.to_string();
    let receiver = receiver_id.to_string();
    let content = content.to_string();
    let row = blocking(move || {
        let row = db.insert_message(&Uuid::new_v4().to_string(), &cid, &sender, &receiver, &content)?;
        // Best effort: `messages` stays authoritative if this write is lost.
        if let Err(e) = db.update_conversation_snapshot(&cid, &row.content, &row.created_at) {
            warn!("Snapshot update for {} failed: {}", cid, e);
        }
        Ok(row)
    })
    .await?;

    let message = row.into_model()?;
    debug!("{} sent {} in {}", claims.sub, message.id, conversation_id);
    state.dispatcher.publish(RealtimeEvent::MessageCreate {
        message: message.clone(),
    });

    Ok((StatusCode::CREATED, Json(message)))
}

/// Mark everything addressed to the caller as read.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state.db, conversation_id, claims.sub).await?;

    let read_at = Utc::now();
    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let viewer = claims.sub.to_string();
    let stamp = format_timestamp(read_at);
    let ids = blocking(move || db.mark_read(&cid, &viewer, &stamp)).await?;

    let updated = ids
        .iter()
        .map(|id| parse_id(id))
        .collect::<anyhow::Result<Vec<Uuid>>>()?;

    if !updated.is_empty() {
        state.dispatcher.publish(RealtimeEvent::MessagesRead {
            conversation_id,
            reader_id: claims.sub,
            message_ids: updated.clone(),
            read_at,
        });
    }

    Ok(Json(MarkReadResponse { updated }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state.db, conversation_id, claims.sub).await?;

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let viewer = claims.sub.to_string();
    let unread = blocking(move || db.count_unread(&cid, &viewer)).await?;

    Ok(Json(UnreadCountResponse {
        conversation_id,
        unread,
    }))
}
