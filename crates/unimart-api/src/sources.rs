//! Storage-backed chat sources for the unified chat list.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use unimart_chat::{ChatError, ChatSource, PresenceLookup};
use unimart_db::Database;
use unimart_db::models::{ConversationRow, parse_id, parse_timestamp};
use unimart_realtime::dispatcher::Dispatcher;
use unimart_types::models::{ChatSummary, ContextType};

pub const GENERAL_CHAT_TITLE: &str = "General chat";

async fn load_blocking<F>(db: &Arc<Database>, f: F) -> Result<Vec<ChatSummary>, ChatError>
where
    F: FnOnce(&Database) -> Result<Vec<ChatSummary>> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| ChatError::Backend(format!("spawn_blocking join error: {}", e)))?
        .map_err(|e| ChatError::Backend(format!("{:#}", e)))
}

fn subtitle(kind: ContextType) -> &'static str {
    match kind {
        ContextType::Shop => "Product",
        ContextType::Exchange => "Money exchange",
        ContextType::Mission => "Mission",
        ContextType::General => "Direct message",
    }
}

/// Display title for a chat about a marketplace item. Missing rows fall back
/// to a generic label so a deleted listing never hides its chat.
pub fn resolve_title(db: &Database, kind: ContextType, context_id: Option<&str>) -> Result<String> {
    let Some(context_id) = context_id else {
        return Ok(GENERAL_CHAT_TITLE.to_string());
    };

    let title = match kind {
        ContextType::Shop => db.product_name(context_id)?,
        ContextType::Exchange => db.exchange_pair(context_id)?.map(|(from, to)| format!("{}/{}", from, to)),
        ContextType::Mission => db.mission_title(context_id)?,
        ContextType::General => Some(GENERAL_CHAT_TITLE.to_string()),
    };
    Ok(title.unwrap_or_else(|| subtitle(kind).to_string()))
}

// -- Direct conversations --

pub struct ConversationSource {
    db: Arc<Database>,
}

impl ConversationSource {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn conversation_summary(db: &Database, row: ConversationRow, viewer: &str) -> Result<ChatSummary> {
    let unread_count = db.count_unread(&row.id, viewer)?;
    let conversation = row.into_model()?;
    let viewer_id = parse_id(viewer)?;

    let kind = conversation.context_type.unwrap_or(ContextType::General);
    let title = resolve_title(db, kind, conversation.context_id.as_deref())?;
    let other_participant_id = conversation
        .other_participant(viewer_id)
        .unwrap_or(conversation.participant_a);

    Ok(ChatSummary {
        id: conversation.id.to_string(),
        kind,
        title,
        subtitle: subtitle(kind).to_string(),
        last_message: conversation.last_message,
        last_message_at: conversation.last_message_at,
        unread_count,
        other_participant_id,
        other_online: false,
        context_id: conversation.context_id,
        navigation_target: format!("/chat/{}", conversation.id),
    })
}

#[async_trait]
impl ChatSource for ConversationSource {
    fn name(&self) -> &'static str {
        "conversations"
    }

    async fn load(&self, viewer_id: Uuid) -> Result<Vec<ChatSummary>, ChatError> {
        let viewer = viewer_id.to_string();
        load_blocking(&self.db, move |db| {
            db.conversations_for_user(&viewer)?
                .into_iter()
                .map(|row| conversation_summary(db, row, &viewer))
                .collect()
        })
        .await
    }
}

// -- Legacy per-product channels --

pub struct ProductChannelSource {
    db: Arc<Database>,
}

impl ProductChannelSource {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChatSource for ProductChannelSource {
    fn name(&self) -> &'static str {
        "product channels"
    }

    async fn load(&self, viewer_id: Uuid) -> Result<Vec<ChatSummary>, ChatError> {
        let viewer = viewer_id.to_string();
        load_blocking(&self.db, move |db| {
            let mut chats = Vec::new();
            for channel in db.channels_for_user(&viewer)? {
                let other = if channel.buyer_id == viewer {
                    &channel.seller_id
                } else {
                    &channel.buyer_id
                };
                let last = db.last_message(&channel.id)?;
                let last_message_at = last.as_ref().map(|m| parse_timestamp(&m.created_at)).transpose()?;

                chats.push(ChatSummary {
                    id: channel.id.clone(),
                    kind: ContextType::Shop,
                    title: resolve_title(db, ContextType::Shop, Some(&channel.product_id))?,
                    subtitle: subtitle(ContextType::Shop).to_string(),
                    last_message: last.map(|m| m.content),
                    last_message_at,
                    unread_count: db.count_unread(&channel.id, &viewer)?,
                    other_participant_id: parse_id(other)?,
                    other_online: false,
                    context_id: Some(channel.product_id.clone()),
                    navigation_target: format!("/chat/{}", channel.id),
                });
            }
            Ok(chats)
        })
        .await
    }
}

// -- Legacy exchange messages --

pub struct ExchangeChatSource {
    db: Arc<Database>,
}

impl ExchangeChatSource {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChatSource for ExchangeChatSource {
    fn name(&self) -> &'static str {
        "exchange messages"
    }

    async fn load(&self, viewer_id: Uuid) -> Result<Vec<ChatSummary>, ChatError> {
        let viewer = viewer_id.to_string();
        load_blocking(&self.db, move |db| {
            let mut chats = Vec::new();
            for thread in db.exchange_threads_for_user(&viewer)? {
                chats.push(ChatSummary {
                    id: format!("exchange:{}:{}", thread.exchange_id, thread.other_id),
                    kind: ContextType::Exchange,
                    title: resolve_title(db, ContextType::Exchange, Some(&thread.exchange_id))?,
                    subtitle: subtitle(ContextType::Exchange).to_string(),
                    last_message: Some(thread.last_message),
                    last_message_at: Some(parse_timestamp(&thread.last_message_at)?),
                    unread_count: db.count_unread_exchange(&thread.exchange_id, &thread.other_id, &viewer)?,
                    other_participant_id: parse_id(&thread.other_id)?,
                    other_online: false,
                    navigation_target: format!("/exchange/{}/chat/{}", thread.exchange_id, thread.other_id),
                    context_id: Some(thread.exchange_id),
                });
            }
            Ok(chats)
        })
        .await
    }
}

// -- Presence --

/// Online if the user holds a live gateway connection here or has a fresh
/// presence row (written by any gateway sharing the database).
pub struct DbPresence {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl DbPresence {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }
}

#[async_trait]
impl PresenceLookup for DbPresence {
    async fn is_online(&self, user_id: Uuid) -> bool {
        if self.dispatcher.is_online(user_id).await {
            return true;
        }

        let db = self.db.clone();
        let uid = user_id.to_string();
        match tokio::task::spawn_blocking(move || db.get_presence(&uid)).await {
            Ok(Ok(row)) => row.is_some_and(|p| p.online),
            Ok(Err(e)) => {
                warn!("Presence lookup for {} failed: {}", user_id, e);
                false
            }
            Err(e) => {
                warn!("spawn_blocking join error: {}", e);
                false
            }
        }
    }
}
