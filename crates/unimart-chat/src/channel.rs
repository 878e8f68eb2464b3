use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use unimart_types::events::RealtimeEvent;
use unimart_types::models::Message;

use crate::config::ChannelConfig;
use crate::error::ChatError;
use crate::transport::RealtimeTransport;

/// `Disconnected -> Connecting -> Connected`; after a transport failure
/// `Reconnecting` until connected again or the attempt budget runs out.
/// `Connected` means the transport confirmed the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, max_attempts: u32 },
}

/// Callbacks of one subscription. They run on the subscription task and
/// must return quickly; heavier follow-up work belongs in a spawned task.
pub trait ChannelHandler: Send + Sync {
    fn on_message(&self, message: Message);

    fn on_messages_read(&self, _reader_id: Uuid, _message_ids: &[Uuid], _read_at: DateTime<Utc>) {}

    fn on_typing(&self, _user_id: Uuid, _is_typing: bool) {}

    fn on_presence(&self, _user_id: Uuid, _online: bool) {}

    fn on_error(&self, _error: &ChatError) {}

    fn on_connection_state_change(&self, _state: ConnectionState) {}
}

type Registry = Mutex<HashMap<Uuid, (u64, AbortHandle)>>;

/// Realtime subscriptions of one viewer session, at most one per
/// conversation.
pub struct RealtimeChannel {
    transport: Arc<dyn RealtimeTransport>,
    config: ChannelConfig,
    active: Arc<Registry>,
    next_generation: Mutex<u64>,
}

impl RealtimeChannel {
    pub fn new(transport: Arc<dyn RealtimeTransport>, config: ChannelConfig) -> Self {
        Self {
            transport,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Mutex::new(0),
        }
    }

    /// Start delivering events of `conversation_id` to `handler`. A previous
    /// subscription to the same conversation is released first.
    pub fn subscribe(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        handler: Arc<dyn ChannelHandler>,
    ) -> Subscription {
        let generation = {
            let mut next = self.next_generation.lock();
            *next += 1;
            *next
        };

        let task = tokio::spawn(run_subscription(
            self.transport.clone(),
            self.config.clone(),
            conversation_id,
            viewer_id,
            handler,
        ));

        if let Some((_, previous)) = self
            .active
            .lock()
            .insert(conversation_id, (generation, task.abort_handle()))
        {
            debug!("Replacing realtime subscription for {}", conversation_id);
            previous.abort();
        }

        Subscription {
            conversation_id,
            generation,
            abort: task.abort_handle(),
            registry: Arc::downgrade(&self.active),
        }
    }

    pub fn is_subscribed(&self, conversation_id: Uuid) -> bool {
        self.active.lock().contains_key(&conversation_id)
    }

    /// Release every subscription (sign-out).
    pub fn unsubscribe_all(&self) {
        for (_, (_, abort)) in self.active.lock().drain() {
            abort.abort();
        }
    }
}

/// Handle to a live subscription. Unsubscribing is idempotent and also
/// happens on drop.
pub struct Subscription {
    conversation_id: Uuid,
    generation: u64,
    abort: AbortHandle,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn unsubscribe(&self) {
        self.abort.abort();

        if let Some(registry) = self.registry.upgrade() {
            let mut active = registry.lock();
            if active.get(&self.conversation_id).is_some_and(|(g, _)| *g == self.generation) {
                active.remove(&self.conversation_id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn run_subscription(
    transport: Arc<dyn RealtimeTransport>,
    config: ChannelConfig,
    conversation_id: Uuid,
    viewer_id: Uuid,
    handler: Arc<dyn ChannelHandler>,
) {
    let max_attempts = config.max_reconnect_attempts;
    let mut attempt: u32 = 0;
    handler.on_connection_state_change(ConnectionState::Connecting);

    loop {
        match transport.connect(conversation_id).await {
            Ok(mut events) => {
                handler.on_connection_state_change(ConnectionState::Connected);
                let connected_at = Instant::now();

                while let Some(item) = events.next().await {
                    match item {
                        Ok(event) => dispatch(handler.as_ref(), conversation_id, viewer_id, event),
                        Err(e) => {
                            warn!("Realtime connection for {} dropped: {}", conversation_id, e);
                            handler.on_error(&e);
                            break;
                        }
                    }
                }

                if connected_at.elapsed() >= config.stable_connection {
                    attempt = 0;
                }
            }
            Err(e) => {
                warn!("Realtime connect for {} failed: {}", conversation_id, e);
                handler.on_error(&e);
                if !e.is_retryable() {
                    handler.on_connection_state_change(ConnectionState::Disconnected);
                    return;
                }
            }
        }

        attempt += 1;
        if attempt > max_attempts {
            info!(
                "Giving up on realtime for {} after {} attempts",
                conversation_id, max_attempts
            );
            handler.on_connection_state_change(ConnectionState::Disconnected);
            return;
        }

        handler.on_connection_state_change(ConnectionState::Reconnecting { attempt, max_attempts });
        tokio::time::sleep(config.reconnect_delay(attempt)).await;
    }
}

fn dispatch(handler: &dyn ChannelHandler, conversation_id: Uuid, viewer_id: Uuid, event: RealtimeEvent) {
    if event.conversation_id().is_some_and(|id| id != conversation_id) {
        return;
    }

    match event {
        RealtimeEvent::Ready { user_id } => debug!("Realtime ready for {}", user_id),
        RealtimeEvent::Subscribed { .. } => {}
        RealtimeEvent::MessageCreate { message } => handler.on_message(message),
        RealtimeEvent::MessagesRead {
            reader_id,
            message_ids,
            read_at,
            ..
        } => handler.on_messages_read(reader_id, &message_ids, read_at),
        RealtimeEvent::TypingUpdate { user_id, is_typing, .. } => {
            if user_id != viewer_id {
                handler.on_typing(user_id, is_typing);
            }
        }
        RealtimeEvent::PresenceUpdate { user_id, online } => handler.on_presence(user_id, online),
    }
}
