//! Fixtures shared by the unit tests: builders for models, a scripted
//! transport and an in-memory backend whose writes fan out to every
//! connected transport.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use unimart_types::events::RealtimeEvent;
use unimart_types::models::{ChatSummary, ContextType, Conversation, DeliveryStatus, Message};

use crate::backend::ChatBackend;
use crate::error::ChatError;
use crate::transport::{EventStream, RealtimeTransport};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub(crate) fn message(
    conversation_id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: &str,
    offset_secs: i64,
) -> Message {
    Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id,
        receiver_id,
        content: content.to_string(),
        created_at: base_time() + TimeDelta::seconds(offset_secs),
        status: DeliveryStatus::Sent,
        read_at: None,
    }
}

pub(crate) fn summary(
    title: &str,
    kind: ContextType,
    context_id: Option<&str>,
    other_participant_id: Uuid,
    last_message_at: Option<DateTime<Utc>>,
) -> ChatSummary {
    let id = Uuid::new_v4().to_string();
    ChatSummary {
        navigation_target: format!("/chat/{}", id),
        id,
        kind,
        title: title.to_string(),
        subtitle: String::new(),
        last_message: last_message_at.map(|_| "...".to_string()),
        last_message_at,
        unread_count: 0,
        other_participant_id,
        other_online: false,
        context_id: context_id.map(str::to_string),
    }
}

enum Script {
    Unreachable,
    Pending,
    Sessions(Mutex<VecDeque<Vec<Result<RealtimeEvent, ChatError>>>>),
}

/// Transport whose connections follow a fixed script.
pub(crate) struct ScriptedTransport {
    script: Script,
    connects: AtomicUsize,
}

impl ScriptedTransport {
    /// Every connect fails with a retryable error.
    pub(crate) fn unreachable() -> Self {
        Self::with(Script::Unreachable)
    }

    /// Connects never complete.
    pub(crate) fn pending() -> Self {
        Self::with(Script::Pending)
    }

    /// Each connect plays the next session, then stays open without events.
    /// Once the sessions run out, connections open but stay silent.
    pub(crate) fn sessions(sessions: Vec<Vec<Result<RealtimeEvent, ChatError>>>) -> Self {
        Self::with(Script::Sessions(Mutex::new(sessions.into())))
    }

    fn with(script: Script) -> Self {
        Self {
            script,
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn connect(&self, _conversation_id: Uuid) -> Result<EventStream, ChatError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Unreachable => Err(ChatError::Connectivity("connection refused".into())),
            Script::Pending => futures_util::future::pending().await,
            Script::Sessions(sessions) => {
                let events = sessions.lock().pop_front().unwrap_or_default();
                Ok(stream::iter(events).chain(stream::pending()).boxed())
            }
        }
    }
}

/// In-memory stand-in for the hosted backend and its realtime gateway.
pub(crate) struct Hub {
    conversations: Mutex<HashMap<Uuid, Conversation>>,
    messages: Mutex<Vec<Message>>,
    typing: Mutex<Vec<(Uuid, bool)>>,
    events: broadcast::Sender<RealtimeEvent>,
    pub(crate) fail_sends: AtomicBool,
    pub(crate) send_calls: AtomicUsize,
}

impl Hub {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            conversations: Mutex::new(HashMap::new()),
            messages: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
            events,
            fail_sends: AtomicBool::new(false),
            send_calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn create_conversation(&self, a: Uuid, b: Uuid) -> Uuid {
        self.insert_conversation(a, b, None, None).id
    }

    pub(crate) fn conversation_count(&self) -> usize {
        self.conversations.lock().len()
    }

    pub(crate) fn backend(self: &Arc<Self>, user_id: Uuid) -> Arc<HubBackend> {
        Arc::new(HubBackend {
            hub: self.clone(),
            user_id,
        })
    }

    pub(crate) fn transport(self: &Arc<Self>) -> Arc<HubTransport> {
        Arc::new(HubTransport {
            hub: self.clone(),
            online: AtomicBool::new(true),
        })
    }

    /// Push an event to every live connection, bypassing the backend.
    pub(crate) fn inject(&self, event: RealtimeEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn unread(&self, conversation_id: Uuid, viewer_id: Uuid) -> u32 {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.is_unread_for(viewer_id))
            .count() as u32
    }

    pub(crate) fn typing_calls(&self) -> Vec<(Uuid, bool)> {
        self.typing.lock().clone()
    }

    fn insert_conversation(
        &self,
        a: Uuid,
        b: Uuid,
        context_type: Option<ContextType>,
        context_id: Option<String>,
    ) -> Conversation {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            participant_a: a,
            participant_b: b,
            context_type,
            context_id,
            last_message: None,
            last_message_at: None,
            created_at: Utc::now(),
        };
        self.conversations.lock().insert(conversation.id, conversation.clone());
        conversation
    }

    fn conversation_for(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation, ChatError> {
        let conversation = self
            .conversations
            .lock()
            .get(&conversation_id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("conversation {}", conversation_id)))?;
        if conversation.involves(user_id) {
            Ok(conversation)
        } else {
            Err(ChatError::Unauthorized("not a participant".into()))
        }
    }
}

pub(crate) struct HubBackend {
    hub: Arc<Hub>,
    user_id: Uuid,
}

#[async_trait]
impl ChatBackend for HubBackend {
    async fn open_conversation(
        &self,
        other_user_id: Uuid,
        context_type: Option<ContextType>,
        context_id: Option<String>,
    ) -> Result<Conversation, ChatError> {
        let existing = self
            .hub
            .conversations
            .lock()
            .values()
            .find(|c| {
                c.involves(self.user_id)
                    && c.involves(other_user_id)
                    && c.context_type == context_type
                    && c.context_id == context_id
            })
            .cloned();
        Ok(existing.unwrap_or_else(|| {
            self.hub
                .insert_conversation(self.user_id, other_user_id, context_type, context_id)
        }))
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Conversation, ChatError> {
        self.hub.conversation_for(conversation_id, self.user_id)
    }

    async fn load_messages(&self, conversation_id: Uuid, limit: u32) -> Result<Vec<Message>, ChatError> {
        self.hub.conversation_for(conversation_id, self.user_id)?;
        let messages: Vec<Message> = self
            .hub
            .messages
            .lock()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        let skip = messages.len().saturating_sub(limit as usize);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        self.hub.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.hub.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::Connectivity("network unreachable".into()));
        }
        self.hub.conversation_for(conversation_id, sender_id)?;

        let message = {
            let mut messages = self.hub.messages.lock();
            let now = Utc::now();
            let created_at = match messages.last() {
                Some(last) if last.created_at >= now => last.created_at + TimeDelta::microseconds(1),
                _ => now,
            };
            let message = Message {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id,
                receiver_id,
                content: content.to_string(),
                created_at,
                status: DeliveryStatus::Sent,
                read_at: None,
            };
            messages.push(message.clone());
            message
        };
        self.hub.inject(RealtimeEvent::MessageCreate {
            message: message.clone(),
        });
        Ok(message)
    }

    async fn mark_messages_as_read(&self, conversation_id: Uuid, viewer_id: Uuid) -> Result<Vec<Uuid>, ChatError> {
        let read_at = Utc::now();
        let updated: Vec<Uuid> = self
            .hub
            .messages
            .lock()
            .iter_mut()
            .filter(|m| m.conversation_id == conversation_id && m.is_unread_for(viewer_id))
            .map(|m| {
                m.read_at = Some(read_at);
                m.status = DeliveryStatus::Delivered;
                m.id
            })
            .collect();

        if !updated.is_empty() {
            self.hub.inject(RealtimeEvent::MessagesRead {
                conversation_id,
                reader_id: viewer_id,
                message_ids: updated.clone(),
                read_at,
            });
        }
        Ok(updated)
    }

    async fn set_typing_status(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> Result<(), ChatError> {
        self.hub.typing.lock().push((user_id, is_typing));
        self.hub.inject(RealtimeEvent::TypingUpdate {
            conversation_id,
            user_id,
            is_typing,
        });
        Ok(())
    }

    async fn unread_count(&self, conversation_id: Uuid, viewer_id: Uuid) -> Result<u32, ChatError> {
        Ok(self.hub.unread(conversation_id, viewer_id))
    }

    async fn list_chats(&self, _viewer_id: Uuid) -> Result<Vec<ChatSummary>, ChatError> {
        Ok(Vec::new())
    }
}

pub(crate) struct HubTransport {
    hub: Arc<Hub>,
    online: AtomicBool,
}

impl HubTransport {
    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl RealtimeTransport for HubTransport {
    async fn connect(&self, _conversation_id: Uuid) -> Result<EventStream, ChatError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ChatError::Connectivity("offline".into()));
        }
        let rx = self.hub.events.subscribe();
        let events = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(events.boxed())
    }
}
