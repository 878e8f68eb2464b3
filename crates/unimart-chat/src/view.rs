use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use unimart_types::models::Message;

use crate::channel::{ChannelHandler, ConnectionState, Subscription};
use crate::error::ChatError;
use crate::presence::PresenceTracker;
use crate::session::SessionContext;
use crate::thread::{ChatThread, LocalId, ThreadMessage};
use crate::typing::TypingDebouncer;

/// Lifecycle of an open chat: `Loading -> AccessCheck -> Ready`, or
/// `Denied` when the viewer is not a participant, or `Failed` when the
/// conversation could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    Loading,
    AccessCheck,
    Ready,
    Denied(ChatError),
    Failed(ChatError),
}

/// One open conversation: the message list, the typing indicator and the
/// realtime subscription feeding both. Closing (or dropping) the view
/// releases the subscription and the typing timer; sends already in flight
/// still complete but no longer touch the view.
pub struct ChatView {
    inner: Arc<ViewInner>,
    subscription: Mutex<Option<Subscription>>,
    typing: Mutex<Option<TypingDebouncer>>,
}

struct ViewInner {
    session: Arc<SessionContext>,
    conversation_id: Uuid,
    closed: AtomicBool,
    data: Mutex<ViewData>,
}

struct ViewData {
    state: ViewState,
    connection: ConnectionState,
    thread: Option<ChatThread>,
    presence: PresenceTracker,
    last_error: Option<ChatError>,
}

impl ChatView {
    pub(crate) async fn open(session: Arc<SessionContext>, conversation_id: Uuid) -> Self {
        let typing_timeout = session.config().typing_idle;
        let view = Self {
            inner: Arc::new(ViewInner {
                session,
                conversation_id,
                closed: AtomicBool::new(false),
                data: Mutex::new(ViewData {
                    state: ViewState::Loading,
                    connection: ConnectionState::Disconnected,
                    thread: None,
                    presence: PresenceTracker::new(typing_timeout),
                    last_error: None,
                }),
            }),
            subscription: Mutex::new(None),
            typing: Mutex::new(None),
        };
        view.load().await;
        view
    }

    async fn load(&self) {
        let inner = &self.inner;
        let session = &inner.session;
        let viewer = session.user_id();
        let conversation_id = inner.conversation_id;

        inner.set_state(ViewState::AccessCheck);
        if !session.is_active() {
            inner.set_state(ViewState::Denied(ChatError::Unauthorized("session ended".into())));
            return;
        }

        let conversation = match session.backend().get_conversation(conversation_id).await {
            Ok(conversation) => conversation,
            Err(e @ (ChatError::Unauthorized(_) | ChatError::NotFound(_))) => {
                inner.set_state(ViewState::Denied(e));
                return;
            }
            Err(e) => {
                inner.set_state(ViewState::Failed(e));
                return;
            }
        };
        let Some(other) = conversation.other_participant(viewer) else {
            debug!("{} is not a participant of {}", viewer, conversation_id);
            inner.set_state(ViewState::Denied(ChatError::Unauthorized(
                "not a participant of this conversation".into(),
            )));
            return;
        };

        inner.data.lock().thread = Some(ChatThread::new(conversation_id, viewer, other));

        // History and realtime overlap; the thread merges both by id.
        let handler = Arc::new(ViewHandler {
            inner: Arc::downgrade(&self.inner),
        });
        *self.subscription.lock() = Some(session.channel().subscribe(conversation_id, viewer, handler));

        let history = match session
            .backend()
            .load_messages(conversation_id, session.config().history_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                self.release();
                inner.set_state(ViewState::Failed(e));
                return;
            }
        };
        let live_before_ready = {
            let mut data = inner.data.lock();
            if let Some(thread) = data.thread.as_mut() {
                thread.load_history(history);
            }
            data.state = ViewState::Ready;
            data.connection == ConnectionState::Connected
        };
        // The subscription may have gone live after the history query ran.
        // Once `Ready` is set the handler catches up on its own.
        if live_before_ready {
            inner.refresh().await;
        }

        let weak = Arc::downgrade(&self.inner);
        *self.typing.lock() = Some(TypingDebouncer::spawn(session.config().typing_idle, move |is_typing| {
            if let Some(inner) = weak.upgrade() {
                inner.publish_typing(is_typing);
            }
        }));

        inner.mark_read().await;
    }

    pub fn conversation_id(&self) -> Uuid {
        self.inner.conversation_id
    }

    pub fn state(&self) -> ViewState {
        self.inner.data.lock().state.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.data.lock().connection
    }

    /// `(attempt, max_attempts)` while the channel is reconnecting.
    pub fn retry_counter(&self) -> Option<(u32, u32)> {
        match self.connection_state() {
            ConnectionState::Reconnecting { attempt, max_attempts } => Some((attempt, max_attempts)),
            _ => None,
        }
    }

    pub fn messages(&self) -> Vec<ThreadMessage> {
        self.inner
            .data
            .lock()
            .thread
            .as_ref()
            .map(|t| t.messages().to_vec())
            .unwrap_or_default()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.data.lock().thread.as_ref().map_or(0, ChatThread::unread_count)
    }

    pub fn other_participant(&self) -> Option<Uuid> {
        self.inner.data.lock().thread.as_ref().map(ChatThread::other_id)
    }

    pub fn is_other_online(&self) -> bool {
        let data = self.inner.data.lock();
        data.thread
            .as_ref()
            .is_some_and(|t| data.presence.is_online(t.other_id()))
    }

    /// Remote users currently typing here, expired indicators excluded.
    pub fn typing_users(&self) -> Vec<Uuid> {
        self.inner
            .data
            .lock()
            .presence
            .typing_users(self.inner.conversation_id, Instant::now())
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.inner.data.lock().last_error.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Send `content` to the other participant. The message shows up at once
    /// as `sending` and ends up `sent` or `failed`; a failed message stays in
    /// the list for [`ChatView::retry`].
    pub async fn send(&self, content: &str) -> Result<Message, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation("message is empty".into()));
        }

        self.inner.ensure_session()?;
        let local_id = {
            let mut data = self.inner.data.lock();
            if data.state != ViewState::Ready || self.inner.is_closed() {
                return Err(ChatError::Validation("chat is not open".into()));
            }
            match data.thread.as_mut() {
                Some(thread) => thread.push_optimistic(content),
                None => return Err(ChatError::Validation("chat is not open".into())),
            }
        };
        self.stop_typing();

        self.inner.clone().deliver(local_id, content.to_string()).await
    }

    pub async fn retry(&self, local_id: LocalId) -> Result<Message, ChatError> {
        self.inner.ensure_session()?;
        let content = self
            .inner
            .data
            .lock()
            .thread
            .as_mut()
            .and_then(|t| t.retry(local_id))
            .ok_or_else(|| ChatError::Validation("no failed message to retry".into()))?;

        self.inner.clone().deliver(local_id, content).await
    }

    pub fn discard(&self, local_id: LocalId) -> bool {
        self.inner
            .data
            .lock()
            .thread
            .as_mut()
            .is_some_and(|t| t.discard(local_id))
    }

    /// Feed a keystroke to the typing indicator.
    pub fn on_input(&self) {
        if let Some(typing) = self.typing.lock().as_ref() {
            typing.keystroke();
        }
    }

    pub fn stop_typing(&self) {
        if let Some(typing) = self.typing.lock().as_ref() {
            typing.stop();
        }
    }

    /// Release the subscription and typing timer. Idempotent; also runs on
    /// drop.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!("Closing chat view for {}", self.inner.conversation_id);
        }
        self.release();
    }

    fn release(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
        self.typing.lock().take();
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        self.close();
    }
}

impl ViewInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn viewer(&self) -> Uuid {
        self.session.user_id()
    }

    fn ensure_session(&self) -> Result<(), ChatError> {
        if self.session.is_active() {
            Ok(())
        } else {
            Err(ChatError::Unauthorized("session ended".into()))
        }
    }

    fn set_state(&self, state: ViewState) {
        self.data.lock().state = state;
    }

    fn record_error(&self, error: ChatError) {
        if !self.is_closed() {
            self.data.lock().last_error = Some(error);
        }
    }

    async fn deliver(self: Arc<Self>, local_id: LocalId, content: String) -> Result<Message, ChatError> {
        let viewer = self.viewer();
        let Some(receiver) = self.data.lock().thread.as_ref().map(ChatThread::other_id) else {
            return Err(ChatError::Validation("chat is not open".into()));
        };
        let config = self.session.config();
        let attempts = config.send_attempts.max(1);

        let mut attempt = 1;
        let result = loop {
            match self
                .session
                .backend()
                .send_message(self.conversation_id, viewer, receiver, &content)
                .await
            {
                Ok(message) => break Ok(message),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!("Send attempt {}/{} failed: {}", attempt, attempts, e);
                    tokio::time::sleep(config.send_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        if self.is_closed() {
            return result;
        }
        let mut data = self.data.lock();
        match &result {
            Ok(message) => {
                if let Some(thread) = data.thread.as_mut() {
                    thread.commit(local_id, message.clone());
                }
            }
            Err(e) => {
                warn!("Message to {} failed: {}", self.conversation_id, e);
                if let Some(thread) = data.thread.as_mut() {
                    thread.fail(local_id);
                }
                data.last_error = Some(e.clone());
            }
        }
        result
    }

    async fn mark_read(&self) {
        if self.is_closed() {
            return;
        }
        match self
            .session
            .backend()
            .mark_messages_as_read(self.conversation_id, self.viewer())
            .await
        {
            Ok(updated) => {
                debug!("Marked {} messages read in {}", updated.len(), self.conversation_id);
                if !self.is_closed() {
                    if let Some(thread) = self.data.lock().thread.as_mut() {
                        thread.mark_incoming_read(Utc::now());
                    }
                }
            }
            Err(e) => {
                warn!("Mark read failed for {}: {}", self.conversation_id, e);
                self.record_error(e);
            }
        }
    }

    async fn refresh(&self) {
        let limit = self.session.config().history_limit;
        match self.session.backend().load_messages(self.conversation_id, limit).await {
            Ok(history) if !self.is_closed() => {
                if let Some(thread) = self.data.lock().thread.as_mut() {
                    thread.load_history(history);
                }
            }
            Ok(_) => {}
            Err(e) => self.record_error(e),
        }
    }

    /// Reload history and acknowledge anything new addressed to the viewer.
    async fn catch_up(&self) {
        self.refresh().await;
        let unread = self.data.lock().thread.as_ref().map_or(0, ChatThread::unread_count);
        if unread > 0 {
            self.mark_read().await;
        }
    }

    fn publish_typing(self: Arc<Self>, is_typing: bool) {
        if self.is_closed() || !self.session.is_active() {
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = self
                .session
                .backend()
                .set_typing_status(self.conversation_id, self.viewer(), is_typing)
                .await
            {
                debug!("Typing update failed: {}", e);
            }
        });
    }
}

struct ViewHandler {
    inner: Weak<ViewInner>,
}

impl ViewHandler {
    fn live(&self) -> Option<Arc<ViewInner>> {
        self.inner.upgrade().filter(|inner| !inner.is_closed())
    }
}

impl ChannelHandler for ViewHandler {
    fn on_message(&self, message: Message) {
        let Some(inner) = self.live() else { return };
        let viewer = inner.viewer();

        let needs_read = {
            let mut guard = inner.data.lock();
            let data = &mut *guard;
            data.presence.clear_typing(message.sender_id);
            let incoming = message.receiver_id == viewer;
            let appended = data.thread.as_mut().is_some_and(|t| t.apply_inbound(message));
            appended && incoming && data.state == ViewState::Ready
        };

        if needs_read {
            tokio::spawn(async move { inner.mark_read().await });
        }
    }

    fn on_messages_read(&self, reader_id: Uuid, message_ids: &[Uuid], read_at: DateTime<Utc>) {
        let Some(inner) = self.live() else { return };
        if reader_id == inner.viewer() {
            return;
        }
        if let Some(thread) = inner.data.lock().thread.as_mut() {
            thread.apply_read(message_ids, read_at);
        }
    }

    fn on_typing(&self, user_id: Uuid, is_typing: bool) {
        let Some(inner) = self.live() else { return };
        inner
            .data
            .lock()
            .presence
            .set_typing(user_id, inner.conversation_id, is_typing, Instant::now());
    }

    fn on_presence(&self, user_id: Uuid, online: bool) {
        let Some(inner) = self.live() else { return };
        let mut data = inner.data.lock();
        if online {
            data.presence.set_online(user_id, true);
        } else {
            data.presence.remove(user_id);
        }
    }

    fn on_error(&self, error: &ChatError) {
        let Some(inner) = self.live() else { return };
        inner.data.lock().last_error = Some(error.clone());
    }

    fn on_connection_state_change(&self, state: ConnectionState) {
        let Some(inner) = self.live() else { return };
        let went_live = {
            let mut data = inner.data.lock();
            data.connection = state;
            state == ConnectionState::Connected && data.state == ViewState::Ready
        };

        // Whatever was sent before the subscription went live (first connect
        // or after an outage) is only in the history.
        if went_live {
            tokio::spawn(async move { inner.catch_up().await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatBackend;
    use crate::config::ChannelConfig;
    use crate::test_support::Hub;
    use crate::thread::MessageKey;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use unimart_types::events::RealtimeEvent;
    use unimart_types::models::DeliveryStatus;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn session(hub: &Arc<Hub>, user: Uuid) -> Arc<SessionContext> {
        SessionContext::init(user, hub.backend(user), hub.transport(), ChannelConfig::default())
    }

    #[derive(Default)]
    struct Inbox {
        messages: Mutex<Vec<Message>>,
    }

    impl ChannelHandler for Inbox {
        fn on_message(&self, message: Message) {
            self.messages.lock().push(message);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hello_reaches_receiver_once_and_read_flows_back() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(a, b);
        let session_a = session(&hub, a);
        let session_b = session(&hub, b);

        let view_a = session_a.open_chat(conversation).await;
        let inbox = Arc::new(Inbox::default());
        let _sub_b = session_b.channel().subscribe(conversation, b, inbox.clone());
        settle().await;

        let sent = view_a.send("hello").await.unwrap();
        settle().await;

        assert_eq!(inbox.messages.lock().len(), 1);
        assert_eq!(inbox.messages.lock()[0].id, sent.id);
        assert_eq!(hub.unread(conversation, b), 1);
        assert_eq!(view_a.messages().len(), 1);
        assert_eq!(view_a.messages()[0].status, DeliveryStatus::Sent);

        let view_b = session_b.open_chat(conversation).await;
        settle().await;

        assert_eq!(view_b.state(), ViewState::Ready);
        assert_eq!(hub.unread(conversation, b), 0);
        assert_eq!(view_b.unread_count(), 0);
        let mine = &view_a.messages()[0];
        assert_eq!(mine.key, MessageKey::Server(sent.id));
        assert_eq!(mine.status, DeliveryStatus::Delivered);
        assert!(mine.read_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn non_participant_is_denied() {
        let hub = Hub::new();
        let conversation = hub.create_conversation(Uuid::new_v4(), Uuid::new_v4());
        let outsider = Uuid::new_v4();
        let session = session(&hub, outsider);

        let view = session.open_chat(conversation).await;

        assert!(matches!(view.state(), ViewState::Denied(ChatError::Unauthorized(_))));
        assert!(!session.channel().is_subscribed(conversation));
        assert!(matches!(view.send("hi").await, Err(ChatError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_conversation_is_denied() {
        let hub = Hub::new();
        let session = session(&hub, Uuid::new_v4());

        let view = session.open_chat(Uuid::new_v4()).await;
        assert!(matches!(view.state(), ViewState::Denied(ChatError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_disconnected_fails_within_budget_and_retries() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(a, b);
        let session = session(&hub, a);
        let view = session.open_chat(conversation).await;

        hub.fail_sends.store(true, Ordering::SeqCst);
        let err = view.send("are you there?").await.unwrap_err();

        assert!(matches!(err, ChatError::Connectivity(_)));
        assert_eq!(hub.send_calls.load(Ordering::SeqCst), 3);
        let failed = &view.messages()[0];
        assert_eq!(failed.status, DeliveryStatus::Failed);
        assert_eq!(view.last_error(), Some(err));

        let MessageKey::Local(local_id) = failed.key else {
            panic!("failed message should keep its local key");
        };
        hub.fail_sends.store(false, Ordering::SeqCst);
        let sent = view.retry(local_id).await.unwrap();
        settle().await;

        let messages = view.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, MessageKey::Server(sent.id));
        assert_eq!(messages[0].status, DeliveryStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_message_is_rejected_locally() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(a, b);
        let view = session(&hub, a).open_chat(conversation).await;

        assert!(matches!(view.send("   ").await, Err(ChatError::Validation(_))));
        assert!(view.messages().is_empty());
        assert_eq!(hub.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_indicator_reverts_after_idle() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(a, b);
        let view_a = session(&hub, a).open_chat(conversation).await;
        let view_b = session(&hub, b).open_chat(conversation).await;
        settle().await;

        view_a.on_input();
        settle().await;
        assert_eq!(hub.typing_calls(), [(a, true)]);
        assert_eq!(view_b.typing_users(), [a]);
        assert!(view_a.typing_users().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(hub.typing_calls(), [(a, true), (a, false)]);
        assert!(view_b.typing_users().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_typing_expires_without_stop_event() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(a, b);
        let view = session(&hub, b).open_chat(conversation).await;
        settle().await;

        hub.inject(RealtimeEvent::TypingUpdate {
            conversation_id: conversation,
            user_id: a,
            is_typing: true,
        });
        settle().await;
        assert_eq!(view.typing_users(), [a]);
        assert!(view.is_other_online());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(view.typing_users().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn redelivered_events_render_once() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(a, b);
        let view = session(&hub, b).open_chat(conversation).await;
        settle().await;

        let hello = crate::test_support::message(conversation, a, b, "hello", 0);
        for _ in 0..3 {
            hub.inject(RealtimeEvent::MessageCreate { message: hello.clone() });
        }
        settle().await;

        let messages = view.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn closed_view_ignores_events() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(a, b);
        let session = session(&hub, b);
        let view = session.open_chat(conversation).await;
        settle().await;
        assert_eq!(view.connection_state(), ConnectionState::Connected);

        view.close();
        view.close();
        assert!(view.is_closed());
        assert!(!session.channel().is_subscribed(conversation));

        hub.inject(RealtimeEvent::MessageCreate {
            message: crate::test_support::message(conversation, a, b, "too late", 0),
        });
        settle().await;
        assert!(view.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn message_sent_right_after_open_is_not_lost() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(a, b);
        let view_b = session(&hub, b).open_chat(conversation).await;
        assert_eq!(view_b.state(), ViewState::Ready);

        // Realtime for B is not live yet, so only the history has this one.
        let hello = hub.backend(a).send_message(conversation, a, b, "hello").await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;

        let messages = view_b.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, MessageKey::Server(hello.id));
        assert_eq!(hub.unread(conversation, b), 0);
        assert_eq!(view_b.unread_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_going_offline_clears_presence_and_typing() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(a, b);
        let view = session(&hub, b).open_chat(conversation).await;
        settle().await;

        hub.inject(RealtimeEvent::TypingUpdate {
            conversation_id: conversation,
            user_id: a,
            is_typing: true,
        });
        settle().await;
        assert!(view.is_other_online());
        assert_eq!(view.typing_users(), [a]);

        hub.inject(RealtimeEvent::PresenceUpdate { user_id: a, online: false });
        settle().await;
        assert!(!view.is_other_online());
        assert!(view.typing_users().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_transport_reports_retry_counter() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = hub.create_conversation(a, b);
        let transport = hub.transport();
        transport.set_online(false);
        let session = SessionContext::init(a, hub.backend(a), transport, ChannelConfig::default());

        let view = session.open_chat(conversation).await;
        settle().await;
        assert_eq!(view.state(), ViewState::Ready);
        assert_eq!(view.retry_counter(), Some((1, 5)));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(view.connection_state(), ConnectionState::Disconnected);
        assert_eq!(view.retry_counter(), None);
    }
}
