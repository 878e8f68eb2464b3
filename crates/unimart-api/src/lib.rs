//! REST surface of the Unimart chat backend.

pub mod chats;
pub mod conversations;
pub mod error;
pub mod exchanges;
pub mod messages;
pub mod middleware;
pub mod presence;
pub mod sources;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// Every route requires a bearer token.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chats", get(chats::list_chats))
        .route("/conversations", post(conversations::open_conversation))
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/conversations/{conversation_id}/read", post(messages::mark_read))
        .route("/conversations/{conversation_id}/unread", get(messages::unread_count))
        .route("/conversations/{conversation_id}/typing", post(presence::set_typing))
        .route("/exchanges/{exchange_id}/chat/{other_id}/read", post(exchanges::mark_read))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
