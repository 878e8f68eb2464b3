use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use unimart_db::Database;
use unimart_types::events::{RealtimeCommand, RealtimeEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Handle a WebSocket connection whose bearer token was already validated
/// at the HTTP upgrade.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>, user_id: Uuid) {
    let (mut sender, receiver) = socket.split();

    info!("{} connected to realtime gateway", user_id);

    if send_event(&mut sender, &RealtimeEvent::Ready { user_id }).await.is_err() {
        return;
    }

    // Send existing online users so the client sees who's already here
    for uid in dispatcher.online_users().await {
        let event = RealtimeEvent::PresenceUpdate {
            user_id: uid,
            online: true,
        };
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }

    run_connection_loop(sender, receiver, dispatcher, db, user_id).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
) {
    // Subscribe before going online so our own presence broadcast is not missed
    let mut broadcast_rx = dispatcher.subscribe();
    let conn_id = dispatcher.user_online(user_id).await;
    write_presence(&db, user_id, true, None).await;

    // Per-connection conversation subscriptions (shared between send and recv tasks).
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    // Replies addressed to this connection only, bypassing the broadcast.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<RealtimeEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(conversation_id) = msg.conversation_id {
                        if !is_subscribed(&send_subscriptions, conversation_id) {
                            continue;
                        }
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(event) = reply_rx.recv() => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_db = db.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RealtimeCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_dispatcher, &recv_db, user_id, cmd, &subscriptions, &reply_tx).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if dispatcher.user_offline(user_id, conn_id).await {
        let uid = user_id.to_string();
        match tokio::task::spawn_blocking(move || db.delete_presence(&uid)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to clear presence for {}: {}", user_id, e),
            Err(e) => warn!("spawn_blocking join error: {}", e),
        }
    }
    info!("{} disconnected from realtime gateway", user_id);
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    cmd: RealtimeCommand,
    subscriptions: &Subscriptions,
    reply: &mpsc::UnboundedSender<RealtimeEvent>,
) {
    match cmd {
        RealtimeCommand::Subscribe { conversation_ids } => {
            let mut allowed = Vec::with_capacity(conversation_ids.len());
            for conversation_id in conversation_ids {
                if can_access(db, conversation_id, user_id).await {
                    allowed.push(conversation_id);
                } else {
                    warn!("{} denied subscription to {}", user_id, conversation_id);
                }
            }

            debug!("{} subscribing to {} conversations", user_id, allowed.len());
            subscriptions
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .extend(allowed.iter().copied());

            // Sent after the filter is updated: every later event is forwarded.
            let _ = reply.send(RealtimeEvent::Subscribed {
                conversation_ids: allowed,
            });
        }

        RealtimeCommand::Unsubscribe { conversation_ids } => {
            let mut subs = subscriptions.write().unwrap_or_else(|e| e.into_inner());
            for conversation_id in &conversation_ids {
                subs.remove(conversation_id);
            }
        }

        RealtimeCommand::Typing {
            conversation_id,
            is_typing,
        } => {
            if !is_subscribed(subscriptions, conversation_id) {
                warn!("{} typing in unsubscribed conversation {}", user_id, conversation_id);
                return;
            }

            dispatcher.publish(RealtimeEvent::TypingUpdate {
                conversation_id,
                user_id,
                is_typing,
            });
            write_presence(db, user_id, true, is_typing.then_some(conversation_id)).await;
        }
    }
}

fn is_subscribed(subscriptions: &Subscriptions, conversation_id: Uuid) -> bool {
    subscriptions
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .contains(&conversation_id)
}

/// Whether `user_id` participates in the conversation (or legacy channel).
pub async fn can_access(db: &Arc<Database>, conversation_id: Uuid, user_id: Uuid) -> bool {
    let db = db.clone();
    let cid = conversation_id.to_string();
    let uid = user_id.to_string();

    match tokio::task::spawn_blocking(move || db.participants(&cid)).await {
        Ok(Ok(Some((a, b)))) => a == uid || b == uid,
        Ok(Ok(None)) => false,
        Ok(Err(e)) => {
            warn!("Access check for {} failed: {}", conversation_id, e);
            false
        }
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
            false
        }
    }
}

/// Mirror presence into `user_presence`. Failures only cost freshness.
pub async fn write_presence(db: &Arc<Database>, user_id: Uuid, online: bool, typing_in: Option<Uuid>) {
    let db = db.clone();
    let uid = user_id.to_string();
    let typing = typing_in.map(|id| id.to_string());

    let result = tokio::task::spawn_blocking(move || db.upsert_presence(&uid, online, typing.as_deref())).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to store presence for {}: {}", user_id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &RealtimeEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize realtime event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
