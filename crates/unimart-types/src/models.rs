use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a conversation is about. Determines how its title is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Shop,
    Exchange,
    Mission,
    General,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shop => "shop",
            Self::Exchange => "exchange",
            Self::Mission => "mission",
            Self::General => "general",
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shop" => Ok(Self::Shop),
            "exchange" => Ok(Self::Exchange),
            "mission" => Ok(Self::Mission),
            "general" => Ok(Self::General),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Transmission progress of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// A message reaches at most one terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl FromStr for DeliveryStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// A thread between two users, optionally scoped to a marketplace item.
/// The participant pair is unordered and never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub context_type: Option<ContextType>,
    pub context_id: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// The counterpart of `viewer`, or `None` if `viewer` is not a participant.
    pub fn other_participant(&self, viewer: Uuid) -> Option<Uuid> {
        if self.participant_a == viewer {
            Some(self.participant_b)
        } else if self.participant_b == viewer {
            Some(self.participant_a)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    pub fn is_unread_for(&self, viewer: Uuid) -> bool {
        self.receiver_id == viewer && !self.is_read()
    }
}

/// Ephemeral online/typing state. Never persisted beyond the live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: Uuid,
    pub online: bool,
    /// Conversation the user is currently typing in, if any.
    pub typing_in: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the unified chat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub kind: ContextType,
    pub title: String,
    pub subtitle: String,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub other_participant_id: Uuid,
    pub other_online: bool,
    pub context_id: Option<String>,
    pub navigation_target: String,
}

/// Two summaries with the same key describe the same logical chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatKey {
    pub kind: ContextType,
    pub context_id: Option<String>,
    pub other_participant_id: Uuid,
}

impl ChatSummary {
    pub fn key(&self) -> ChatKey {
        ChatKey {
            kind: self.kind,
            context_id: self.context_id.clone(),
            other_participant_id: self.other_participant_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(a: Uuid, b: Uuid) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            participant_a: a,
            participant_b: b,
            context_type: None,
            context_id: None,
            last_message: None,
            last_message_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn other_participant_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conv = conversation(a, b);

        assert_eq!(conv.other_participant(a), Some(b));
        assert_eq!(conv.other_participant(b), Some(a));
        assert_eq!(conv.other_participant(Uuid::new_v4()), None);
    }

    #[test]
    fn context_type_parses_wire_names() {
        for ctx in [ContextType::Shop, ContextType::Exchange, ContextType::Mission, ContextType::General] {
            assert_eq!(ctx.as_str().parse::<ContextType>(), Ok(ctx));
        }
        assert!("auction".parse::<ContextType>().is_err());
    }

    #[test]
    fn only_delivered_and_failed_are_terminal() {
        assert!(!DeliveryStatus::Sending.is_terminal());
        assert!(!DeliveryStatus::Sent.is_terminal());
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
    }
}
