use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ContextType;

// -- JWT Claims --

/// Bearer token claims, shared by the REST middleware and the realtime
/// gateway. Tokens are minted by the identity provider; the backend only
/// verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenConversationRequest {
    pub other_user_id: Uuid,
    pub context_type: Option<ContextType>,
    pub context_id: Option<String>,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    /// Inferred from the conversation when absent.
    pub receiver_id: Option<Uuid>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub conversation_id: Uuid,
    pub unread: u32,
}

// -- Presence --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypingRequest {
    pub is_typing: bool,
}
