use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::warn;
use uuid::Uuid;

use unimart_types::events::RealtimeEvent;

/// An event serialized once and fanned out to every connection.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    /// `None` for global events (presence), which every connection receives.
    pub conversation_id: Option<Uuid>,
    pub json: Arc<str>,
}

/// Manages all connected clients and broadcasts events.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for realtime events; connections filter by subscription
    broadcast_tx: broadcast::Sender<BroadcastMessage>,

    /// Track online users: user_id -> ids of their live connections
    online_users: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to realtime events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn publish(&self, event: RealtimeEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize realtime event: {}", e);
                return;
            }
        };

        let _ = self.inner.broadcast_tx.send(BroadcastMessage {
            conversation_id: event.conversation_id(),
            json: json.into(),
        });
    }

    /// Register a new connection of a user. Returns its id. Presence is
    /// announced only when this is the user's first live connection.
    pub async fn user_online(&self, user_id: Uuid) -> Uuid {
        let conn_id = Uuid::new_v4();
        let first = {
            let mut online = self.inner.online_users.write().await;
            let connections = online.entry(user_id).or_default();
            connections.insert(conn_id);
            connections.len() == 1
        };

        if first {
            self.publish(RealtimeEvent::PresenceUpdate {
                user_id,
                online: true,
            });
        }

        conn_id
    }

    /// Drop one connection of a user. The user goes offline only when their
    /// last connection closes. Returns whether that happened.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        {
            let mut online = self.inner.online_users.write().await;
            let Some(connections) = online.get_mut(&user_id) else {
                return false;
            };
            if !connections.remove(&conn_id) || !connections.is_empty() {
                return false;
            }
            online.remove(&user_id);
        }

        self.publish(RealtimeEvent::PresenceUpdate {
            user_id,
            online: false,
        });
        true
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.online_users.read().await.contains_key(&user_id)
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.online_users.read().await.keys().copied().collect()
    }
}
