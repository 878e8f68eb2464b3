use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use uuid::Uuid;

use unimart_types::api::{
    MarkReadResponse, OpenConversationRequest, SendMessageRequest, TypingRequest, UnreadCountResponse,
};
use unimart_types::models::{ChatSummary, ContextType, Conversation, Message};

use crate::error::ChatError;

/// Request/response operations of the hosted backend used by the chat core.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Find or lazily create the conversation with `other_user_id` in a context.
    async fn open_conversation(
        &self,
        other_user_id: Uuid,
        context_type: Option<ContextType>,
        context_id: Option<String>,
    ) -> Result<Conversation, ChatError>;

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Conversation, ChatError>;

    /// Latest `limit` messages in ascending creation order.
    async fn load_messages(&self, conversation_id: Uuid, limit: u32) -> Result<Vec<Message>, ChatError>;

    async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<Message, ChatError>;

    /// Returns the ids of messages that became read.
    async fn mark_messages_as_read(&self, conversation_id: Uuid, viewer_id: Uuid) -> Result<Vec<Uuid>, ChatError>;

    async fn set_typing_status(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> Result<(), ChatError>;

    async fn unread_count(&self, conversation_id: Uuid, viewer_id: Uuid) -> Result<u32, ChatError>;

    async fn list_chats(&self, viewer_id: Uuid) -> Result<Vec<ChatSummary>, ChatError>;
}

/// [`ChatBackend`] over the Unimart REST surface. The bearer token decides
/// who the caller is, so user ids passed in must match `user_id`.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: String,
    user_id: Uuid,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            user_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn ensure_caller(&self, user_id: Uuid) -> Result<(), ChatError> {
        if user_id == self.user_id {
            Ok(())
        } else {
            Err(ChatError::Unauthorized(format!(
                "session belongs to {}, not {}",
                self.user_id, user_id
            )))
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ChatError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ChatError::from_status(status, body))
        }
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn open_conversation(
        &self,
        other_user_id: Uuid,
        context_type: Option<ContextType>,
        context_id: Option<String>,
    ) -> Result<Conversation, ChatError> {
        let body = OpenConversationRequest {
            other_user_id,
            context_type,
            context_id,
        };
        let response = self.send(self.client.post(self.url("/conversations")).json(&body)).await?;
        Ok(response.json().await?)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Conversation, ChatError> {
        let url = self.url(&format!("/conversations/{}", conversation_id));
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn load_messages(&self, conversation_id: Uuid, limit: u32) -> Result<Vec<Message>, ChatError> {
        let url = self.url(&format!("/conversations/{}/messages", conversation_id));
        let response = self.send(self.client.get(url).query(&[("limit", limit)])).await?;
        Ok(response.json().await?)
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        self.ensure_caller(sender_id)?;
        let url = self.url(&format!("/conversations/{}/messages", conversation_id));
        let body = SendMessageRequest {
            receiver_id: Some(receiver_id),
            content: content.to_string(),
        };
        let response = self.send(self.client.post(url).json(&body)).await?;
        Ok(response.json().await?)
    }

    async fn mark_messages_as_read(&self, conversation_id: Uuid, viewer_id: Uuid) -> Result<Vec<Uuid>, ChatError> {
        self.ensure_caller(viewer_id)?;
        let url = self.url(&format!("/conversations/{}/read", conversation_id));
        let response = self.send(self.client.post(url)).await?;
        let body: MarkReadResponse = response.json().await?;
        Ok(body.updated)
    }

    async fn set_typing_status(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> Result<(), ChatError> {
        self.ensure_caller(user_id)?;
        let url = self.url(&format!("/conversations/{}/typing", conversation_id));
        self.send(self.client.post(url).json(&TypingRequest { is_typing })).await?;
        Ok(())
    }

    async fn unread_count(&self, conversation_id: Uuid, viewer_id: Uuid) -> Result<u32, ChatError> {
        self.ensure_caller(viewer_id)?;
        let url = self.url(&format!("/conversations/{}/unread", conversation_id));
        let response = self.send(self.client.get(url)).await?;
        let body: UnreadCountResponse = response.json().await?;
        Ok(body.unread)
    }

    async fn list_chats(&self, viewer_id: Uuid) -> Result<Vec<ChatSummary>, ChatError> {
        self.ensure_caller(viewer_id)?;
        let response = self.send(self.client.get(self.url("/chats"))).await?;
        Ok(response.json().await?)
    }
}
