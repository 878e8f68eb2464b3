use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the realtime gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: Uuid },

    /// Reply to `Subscribe`: the conversations this connection now receives.
    /// Conversations the user may not access are left out.
    Subscribed { conversation_ids: Vec<Uuid> },

    /// A message was persisted
    MessageCreate { message: Message },

    /// The reader marked messages addressed to them as read
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },

    /// A user started or stopped typing
    TypingUpdate {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    /// A user came online or went offline
    PresenceUpdate { user_id: Uuid, online: bool },
}

impl RealtimeEvent {
    /// Returns the conversation this event is scoped to.
    /// Events that return `None` are global and go to every connection.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => Some(message.conversation_id),
            Self::MessagesRead { conversation_id, .. } => Some(*conversation_id),
            Self::TypingUpdate { conversation_id, .. } => Some(*conversation_id),
            Self::Ready { .. } | Self::Subscribed { .. } | Self::PresenceUpdate { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over the realtime gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeCommand {
    /// Start receiving conversation-scoped events for these conversations.
    Subscribe { conversation_ids: Vec<Uuid> },

    /// Stop receiving events for these conversations.
    Unsubscribe { conversation_ids: Vec<Uuid> },

    /// Typing indicator, fire-and-forget
    Typing { conversation_id: Uuid, is_typing: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_adjacently_tagged() {
        let user_id = Uuid::new_v4();
        let json = serde_json::to_value(RealtimeEvent::PresenceUpdate { user_id, online: true }).unwrap();

        assert_eq!(json["type"], "PresenceUpdate");
        assert_eq!(json["data"]["online"], true);
    }

    #[test]
    fn presence_is_global_and_typing_is_scoped() {
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        assert_eq!(RealtimeEvent::PresenceUpdate { user_id, online: false }.conversation_id(), None);
        assert_eq!(
            RealtimeEvent::TypingUpdate { conversation_id, user_id, is_typing: true }.conversation_id(),
            Some(conversation_id)
        );
    }

    #[test]
    fn subscribe_command_parses() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"Subscribe","data":{{"conversation_ids":["{id}"]}}}}"#);
        let cmd: RealtimeCommand = serde_json::from_str(&raw).unwrap();

        assert_eq!(cmd, RealtimeCommand::Subscribe { conversation_ids: vec![id] });
    }
}
