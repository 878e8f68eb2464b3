use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;
use uuid::Uuid;

use unimart_types::models::{ChatSummary, ContextType};

use crate::backend::{ChatBackend, HttpBackend};
use crate::channel::RealtimeChannel;
use crate::config::ChannelConfig;
use crate::error::ChatError;
use crate::transport::{RealtimeTransport, WsTransport};
use crate::view::ChatView;

/// Everything a signed-in user's chat surfaces share. Created once on app
/// start (`init`) and torn down on sign-out; views receive it explicitly.
pub struct SessionContext {
    user_id: Uuid,
    backend: Arc<dyn ChatBackend>,
    channel: RealtimeChannel,
    config: ChannelConfig,
    active: AtomicBool,
}

impl SessionContext {
    pub fn init(
        user_id: Uuid,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<dyn RealtimeTransport>,
        config: ChannelConfig,
    ) -> Arc<Self> {
        info!("Chat session started for {}", user_id);
        Arc::new(Self {
            user_id,
            backend,
            channel: RealtimeChannel::new(transport, config.clone()),
            config,
            active: AtomicBool::new(true),
        })
    }

    /// Session against a Unimart server: REST at `api_url`, realtime gateway
    /// at `realtime_url`.
    pub fn connect(
        api_url: &str,
        realtime_url: &str,
        token: &str,
        user_id: Uuid,
        config: ChannelConfig,
    ) -> Arc<Self> {
        let backend = Arc::new(HttpBackend::new(api_url, token, user_id));
        let transport = Arc::new(WsTransport::new(realtime_url, token));
        Self::init(user_id, backend, transport, config)
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Unified chat list, for the initial load and every manual refresh.
    pub async fn chats(&self) -> Result<Vec<ChatSummary>, ChatError> {
        self.ensure_active()?;
        self.backend.list_chats(self.user_id).await
    }

    /// Badge count of one conversation without opening it.
    pub async fn unread_count(&self, conversation_id: Uuid) -> Result<u32, ChatError> {
        self.ensure_active()?;
        self.backend.unread_count(conversation_id, self.user_id).await
    }

    pub async fn open_chat(self: &Arc<Self>, conversation_id: Uuid) -> ChatView {
        ChatView::open(self.clone(), conversation_id).await
    }

    /// Open (creating on first contact) the chat with `other_user_id` about a
    /// marketplace item.
    pub async fn start_chat(
        self: &Arc<Self>,
        other_user_id: Uuid,
        context_type: Option<ContextType>,
        context_id: Option<String>,
    ) -> Result<ChatView, ChatError> {
        self.ensure_active()?;
        if other_user_id == self.user_id {
            return Err(ChatError::Validation("cannot chat with yourself".into()));
        }
        let needs_context_id = matches!(
            context_type,
            Some(ContextType::Shop | ContextType::Exchange | ContextType::Mission)
        );
        if needs_context_id && context_id.as_deref().is_none_or(str::is_empty) {
            return Err(ChatError::Validation("missing context id".into()));
        }

        let conversation = self
            .backend
            .open_conversation(other_user_id, context_type, context_id)
            .await?;
        Ok(self.open_chat(conversation.id).await)
    }

    /// Sign-out: release every realtime subscription. Views still held by
    /// the UI stop receiving events, refuse sends and stop reporting typing.
    pub fn teardown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.channel.unsubscribe_all();
            info!("Chat session ended for {}", self.user_id);
        }
    }

    fn ensure_active(&self) -> Result<(), ChatError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ChatError::Unauthorized("session ended".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Hub;
    use crate::view::ViewState;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn start_chat_validates_before_calling_backend() {
        let hub = Hub::new();
        let me = Uuid::new_v4();
        let session = SessionContext::init(me, hub.backend(me), hub.transport(), ChannelConfig::default());

        let err = session
            .start_chat(Uuid::new_v4(), Some(ContextType::Shop), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::Validation(_)));

        let err = session.start_chat(me, None, None).await.err().unwrap();
        assert!(matches!(err, ChatError::Validation(_)));
        assert_eq!(hub.conversation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_chat_creates_conversation_once() {
        let hub = Hub::new();
        let (me, seller) = (Uuid::new_v4(), Uuid::new_v4());
        let session = SessionContext::init(me, hub.backend(me), hub.transport(), ChannelConfig::default());

        let first = session
            .start_chat(seller, Some(ContextType::Shop), Some("p1".into()))
            .await
            .unwrap();
        let second = session
            .start_chat(seller, Some(ContextType::Shop), Some("p1".into()))
            .await
            .unwrap();

        assert_eq!(first.state(), ViewState::Ready);
        assert_eq!(first.conversation_id(), second.conversation_id());
        assert_eq!(hub.conversation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_releases_subscriptions_and_blocks_new_work() {
        let hub = Hub::new();
        let (me, other) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(me, other);
        let session = SessionContext::init(me, hub.backend(me), hub.transport(), ChannelConfig::default());

        let view = session.open_chat(conversation).await;
        assert!(session.channel().is_subscribed(conversation));

        session.teardown();
        assert!(!session.is_active());
        assert!(!session.channel().is_subscribed(conversation));
        assert!(matches!(session.chats().await, Err(ChatError::Unauthorized(_))));
        assert!(matches!(session.unread_count(conversation).await, Err(ChatError::Unauthorized(_))));

        assert!(matches!(view.send("x").await, Err(ChatError::Unauthorized(_))));
        assert!(view.messages().is_empty());
        assert_eq!(hub.send_calls.load(Ordering::SeqCst), 0);

        view.on_input();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(hub.typing_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unread_badge_without_opening_the_chat() {
        let hub = Hub::new();
        let (me, seller) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(me, seller);
        hub.backend(seller)
            .send_message(conversation, seller, me, "still interested?")
            .await
            .unwrap();
        let session = SessionContext::init(me, hub.backend(me), hub.transport(), ChannelConfig::default());

        assert_eq!(session.unread_count(conversation).await.unwrap(), 1);

        let _view = session.open_chat(conversation).await;
        assert_eq!(session.unread_count(conversation).await.unwrap(), 0);
    }
}
