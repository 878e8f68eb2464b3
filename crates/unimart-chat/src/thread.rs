use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use unimart_types::models::{DeliveryStatus, Message};

/// Temporary id of a message that the backend has not confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(Uuid);

impl LocalId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Stable identity of a rendered message. Reconciliation goes through this
/// key, never through the position in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Local(LocalId),
    Server(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMessage {
    pub key: MessageKey,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub read_at: Option<DateTime<Utc>>,
}

impl ThreadMessage {
    pub fn server_id(&self) -> Option<Uuid> {
        match self.key {
            MessageKey::Server(id) => Some(id),
            MessageKey::Local(_) => None,
        }
    }

    fn from_message(message: Message) -> Self {
        Self {
            key: MessageKey::Server(message.id),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            created_at: message.created_at,
            status: message.status,
            read_at: message.read_at,
        }
    }
}

/// The visible message list of one open conversation.
///
/// Server messages are unique by id: redelivery after a reconnect is
/// ignored. Inbound messages are appended at the tail in delivery order.
/// Local placeholders move `sending -> sent` (replaced by the server copy) or
/// `sending -> failed`, and a failed placeholder can go back to `sending`.
#[derive(Debug)]
pub struct ChatThread {
    conversation_id: Uuid,
    viewer_id: Uuid,
    other_id: Uuid,
    messages: Vec<ThreadMessage>,
    seen: HashSet<Uuid>,
}

impl ChatThread {
    pub fn new(conversation_id: Uuid, viewer_id: Uuid, other_id: Uuid) -> Self {
        Self {
            conversation_id,
            viewer_id,
            other_id,
            messages: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn other_id(&self) -> Uuid {
        self.other_id
    }

    pub fn messages(&self) -> &[ThreadMessage] {
        &self.messages
    }

    /// Merge a history page. Confirmed messages end up in ascending creation
    /// order; pending placeholders stay at the tail.
    pub fn load_history(&mut self, history: Vec<Message>) {
        let (mut confirmed, pending): (Vec<_>, Vec<_>) =
            self.messages.drain(..).partition(|m| m.server_id().is_some());

        for message in history {
            if message.conversation_id == self.conversation_id && self.seen.insert(message.id) {
                confirmed.push(ThreadMessage::from_message(message));
            }
        }
        confirmed.sort_by_key(|m| m.created_at);

        self.messages = confirmed;
        self.messages.extend(pending);
    }

    /// Append an optimistic placeholder for a message the viewer is sending.
    pub fn push_optimistic(&mut self, content: impl Into<String>) -> LocalId {
        let local_id = LocalId::new();
        self.messages.push(ThreadMessage {
            key: MessageKey::Local(local_id),
            sender_id: self.viewer_id,
            receiver_id: self.other_id,
            content: content.into(),
            created_at: Utc::now(),
            status: DeliveryStatus::Sending,
            read_at: None,
        });
        local_id
    }

    /// Reconcile a placeholder with the server's copy. If realtime already
    /// delivered that id the placeholder is dropped instead.
    pub fn commit(&mut self, local_id: LocalId, message: Message) {
        let position = self.position(MessageKey::Local(local_id));

        if !self.seen.insert(message.id) {
            if let Some(idx) = position {
                self.messages.remove(idx);
            }
            return;
        }

        let confirmed = ThreadMessage::from_message(message);
        match position {
            Some(idx) => self.messages[idx] = confirmed,
            None => self.messages.push(confirmed),
        }
    }

    /// Returns false if the placeholder is gone or no longer sending.
    pub fn fail(&mut self, local_id: LocalId) -> bool {
        match self.get_mut(MessageKey::Local(local_id)) {
            Some(m) if m.status == DeliveryStatus::Sending => {
                m.status = DeliveryStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Move a failed placeholder back to `sending`. Returns its content.
    pub fn retry(&mut self, local_id: LocalId) -> Option<String> {
        match self.get_mut(MessageKey::Local(local_id)) {
            Some(m) if m.status == DeliveryStatus::Failed => {
                m.status = DeliveryStatus::Sending;
                Some(m.content.clone())
            }
            _ => None,
        }
    }

    /// Drop a placeholder the user gave up on.
    pub fn discard(&mut self, local_id: LocalId) -> bool {
        match self.position(MessageKey::Local(local_id)) {
            Some(idx) => {
                self.messages.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Append a message delivered by the realtime channel. Returns false for
    /// redeliveries and messages of other conversations.
    pub fn apply_inbound(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation_id || !self.seen.insert(message.id) {
            return false;
        }
        self.messages.push(ThreadMessage::from_message(message));
        true
    }

    /// The counterpart read some of the viewer's messages.
    pub fn apply_read(&mut self, message_ids: &[Uuid], read_at: DateTime<Utc>) {
        let ids: HashSet<&Uuid> = message_ids.iter().collect();
        for m in &mut self.messages {
            if let Some(id) = m.server_id() {
                if ids.contains(&id) {
                    m.read_at.get_or_insert(read_at);
                    if !m.status.is_terminal() {
                        m.status = DeliveryStatus::Delivered;
                    }
                }
            }
        }
    }

    /// Local mirror of `mark_messages_as_read` for the viewer.
    pub fn mark_incoming_read(&mut self, read_at: DateTime<Utc>) {
        let viewer_id = self.viewer_id;
        for m in &mut self.messages {
            if m.receiver_id == viewer_id && m.read_at.is_none() {
                m.read_at = Some(read_at);
            }
        }
    }

    /// Messages addressed to the viewer that are not read yet.
    pub fn unread_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.receiver_id == self.viewer_id && m.read_at.is_none())
            .count()
    }

    pub fn status_of(&self, key: MessageKey) -> Option<DeliveryStatus> {
        self.messages.iter().find(|m| m.key == key).map(|m| m.status)
    }

    fn position(&self, key: MessageKey) -> Option<usize> {
        self.messages.iter().position(|m| m.key == key)
    }

    fn get_mut(&mut self, key: MessageKey) -> Option<&mut ThreadMessage> {
        self.messages.iter_mut().find(|m| m.key == key)
    }
}
