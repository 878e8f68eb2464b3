use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use unimart_db::Database;
use unimart_db::models::{parse_id, parse_timestamp};
use unimart_types::api::{Claims, OpenConversationRequest};
use unimart_types::models::{ContextType, Conversation};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

/// A conversation, or a legacy product channel presented as one.
pub fn load_conversation(db: &Database, id: &str) -> anyhow::Result<Option<Conversation>> {
    if let Some(row) = db.get_conversation(id)? {
        return Ok(Some(row.into_model()?));
    }

    let Some(channel) = db.get_channel(id)? else {
        return Ok(None);
    };
    let last = db.last_message(&channel.id)?;
    Ok(Some(Conversation {
        id: parse_id(&channel.id)?,
        participant_a: parse_id(&channel.buyer_id)?,
        participant_b: parse_id(&channel.seller_id)?,
        context_type: Some(ContextType::Shop),
        context_id: Some(channel.product_id),
        last_message_at: last.as_ref().map(|m| parse_timestamp(&m.created_at)).transpose()?,
        last_message: last.map(|m| m.content),
        created_at: parse_timestamp(&channel.created_at)?,
    }))
}

/// Load `conversation_id` and check that `user_id` takes part in it.
pub async fn authorize(db: &Arc<Database>, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation, ApiError> {
    let db = db.clone();
    let id = conversation_id.to_string();
    let conversation = blocking(move || load_conversation(&db, &id))
        .await?
        .ok_or(ApiError::NotFound("conversation"))?;

    if conversation.involves(user_id) {
        Ok(conversation)
    } else {
        debug!("{} denied access to {}", user_id, conversation_id);
        Err(ApiError::Forbidden)
    }
}

/// Find or lazily create the conversation between the caller and another
/// user about a marketplace item (or a general chat when no context is given).
pub async fn open_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.other_user_id == claims.sub {
        return Err(ApiError::BadRequest("cannot open a conversation with yourself".into()));
    }

    let context_type = req.context_type.filter(|c| *c != ContextType::General);
    let context_id = req.context_id.filter(|id| !id.trim().is_empty());
    match (context_type, &context_id) {
        (Some(_), None) => return Err(ApiError::BadRequest("context_id is required".into())),
        (None, Some(_)) => return Err(ApiError::BadRequest("context_id needs a context_type".into())),
        _ => {}
    }

    let db = state.db.clone();
    let me = claims.sub.to_string();
    let other = req.other_user_id.to_string();
    let (row, created) = blocking(move || {
        let ctx_type = context_type.map(|c| c.as_str());
        if let Some(existing) = db.find_conversation(&me, &other, ctx_type, context_id.as_deref())? {
            return Ok((existing, false));
        }
        let id = Uuid::new_v4().to_string();
        let row = db.create_conversation(&id, &me, &other, ctx_type, context_id.as_deref())?;
        Ok((row, true))
    })
    .await?;

    let conversation = row.into_model()?;
    let status = if created {
        info!("{} opened conversation {} with {}", claims.sub, conversation.id, req.other_user_id);
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(conversation)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = authorize(&state.db, conversation_id, claims.sub).await?;
    Ok(Json(conversation))
}
