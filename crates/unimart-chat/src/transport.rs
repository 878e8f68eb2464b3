use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, warn};
use uuid::Uuid;

use unimart_types::events::{RealtimeCommand, RealtimeEvent};

use crate::error::ChatError;

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound events of one realtime connection. The stream ends, or yields an
/// error, when the transport drops.
pub type EventStream = BoxStream<'static, Result<RealtimeEvent, ChatError>>;

/// Opens realtime connections scoped to one conversation.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Resolves once the subscription is live: every event of the
    /// conversation published afterwards is on the returned stream.
    async fn connect(&self, conversation_id: Uuid) -> Result<EventStream, ChatError>;
}

/// WebSocket transport against the Unimart realtime gateway.
pub struct WsTransport {
    url: String,
    token: String,
}

impl WsTransport {
    /// `url` is the gateway endpoint, e.g. `ws://localhost:3000/realtime`.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn connect(&self, conversation_id: Uuid) -> Result<EventStream, ChatError> {
        let url = format!("{}?token={}", self.url, self.token);
        let (mut socket, _) = connect_async(url).await?;

        let subscribe = RealtimeCommand::Subscribe {
            conversation_ids: vec![conversation_id],
        };
        let text = serde_json::to_string(&subscribe).map_err(|e| ChatError::Backend(e.to_string()))?;
        socket.send(WsMessage::text(text)).await?;

        // Events arriving ahead of the acknowledgement (Ready, presence) are
        // replayed at the head of the stream.
        let mut early: Vec<Result<RealtimeEvent, ChatError>> = Vec::new();
        let acknowledged = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
            while let Some(frame) = socket.next().await {
                match decode(frame) {
                    Some(Ok(RealtimeEvent::Subscribed { conversation_ids })) => {
                        return Ok(conversation_ids.contains(&conversation_id));
                    }
                    Some(Ok(event)) => early.push(Ok(event)),
                    Some(Err(e)) => return Err(e),
                    None => {}
                }
            }
            Err(ChatError::Connectivity("closed before subscribing".into()))
        })
        .await
        .map_err(|_| ChatError::Connectivity("subscription was not acknowledged".into()))??;

        if !acknowledged {
            return Err(ChatError::Unauthorized(format!(
                "realtime access to {} denied",
                conversation_id
            )));
        }
        debug!("Realtime connection open for {}", conversation_id);

        let events = socket.filter_map(|frame| future::ready(decode(frame)));
        Ok(stream::iter(early).chain(events).boxed())
    }
}

fn decode(frame: Result<WsMessage, WsError>) -> Option<Result<RealtimeEvent, ChatError>> {
    match frame {
        Ok(WsMessage::Text(text)) => match serde_json::from_str::<RealtimeEvent>(text.as_str()) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("Ignoring malformed realtime event: {}", e);
                None
            }
        },
        Ok(WsMessage::Close(_)) => Some(Err(ChatError::Connectivity("closed by server".into()))),
        Ok(_) => None,
        Err(e) => Some(Err(e.into())),
    }
}
