//! Database row types: these map directly to SQLite rows.
//! Distinct from unimart-types models to keep the DB layer independent;
//! `into_model` converts at the boundary.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use unimart_types::models::{ContextType, Conversation, DeliveryStatus, Message, Presence};

pub struct ConversationRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub context_type: Option<String>,
    pub context_id: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub status: String,
    pub read_at: Option<String>,
    pub created_at: String,
}

pub struct ChannelRow {
    pub id: String,
    pub product_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub created_at: String,
}

/// Latest exchange message per (exchange, counterpart) as seen by one viewer.
pub struct ExchangeThreadRow {
    pub exchange_id: String,
    pub other_id: String,
    pub last_message: String,
    pub last_message_at: String,
}

pub struct PresenceRow {
    pub user_id: String,
    pub online: bool,
    pub typing_in: Option<String>,
    pub updated_at: String,
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// lexical order in SQL matches chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("Corrupt timestamp '{}'", raw))
}

pub fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt id '{}'", raw))
}

fn parse_optional_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_timestamp).transpose()
}

impl ConversationRow {
    pub fn into_model(self) -> Result<Conversation> {
        let context_type = self
            .context_type
            .as_deref()
            .map(|raw| raw.parse::<ContextType>())
            .transpose()?;

        Ok(Conversation {
            id: parse_id(&self.id)?,
            participant_a: parse_id(&self.participant_a)?,
            participant_b: parse_id(&self.participant_b)?,
            context_type,
            context_id: self.context_id,
            last_message: self.last_message,
            last_message_at: parse_optional_timestamp(self.last_message_at.as_deref())?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_model(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id)?,
            conversation_id: parse_id(&self.conversation_id)?,
            sender_id: parse_id(&self.sender_id)?,
            receiver_id: parse_id(&self.receiver_id)?,
            status: self.status.parse::<DeliveryStatus>()?,
            read_at: parse_optional_timestamp(self.read_at.as_deref())?,
            created_at: parse_timestamp(&self.created_at)?,
            content: self.content,
        })
    }
}

impl PresenceRow {
    pub fn into_model(self) -> Result<Presence> {
        Ok(Presence {
            user_id: parse_id(&self.user_id)?,
            online: self.online,
            typing_in: self.typing_in.as_deref().map(parse_id).transpose()?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}
