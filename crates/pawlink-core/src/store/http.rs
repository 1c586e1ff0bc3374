use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use pawlink_models::events::ReactionCount;

use super::{ConversationStore, NewMessage, StoreError};

/// Conversation store backed by the CRUD backend's internal REST surface.
pub struct HttpConversationStore {
    client: reqwest::Client,
    base_url: String,
    service_token: Option<String>,
}

#[derive(Deserialize)]
struct ParticipantReply {
    participant: bool,
}

#[derive(Deserialize)]
struct ReactionsReply {
    reactions: Vec<ReactionCount>,
}

impl HttpConversationStore {
    pub fn new(base_url: impl Into<String>, service_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.service_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = builder
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StoreError::ChatNotFound),
            status => Err(StoreError::Rejected(format!("status {status}"))),
        }
    }
}

#[async_trait]
impl ConversationStore for HttpConversationStore {
    async fn is_participant(&self, chat_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let path = format!("/internal/chats/{chat_id}/participants/{user_id}");
        let response = self.send(self.request(reqwest::Method::GET, &path)).await?;
        let reply: ParticipantReply = response
            .json()
            .await
            .map_err(|err| StoreError::Rejected(err.to_string()))?;
        Ok(reply.participant)
    }

    async fn mark_messages_read(&self, chat_id: &str, user_id: &str) -> Result<(), StoreError> {
        let path = format!("/internal/chats/{chat_id}/read");
        self.send(
            self.request(reqwest::Method::POST, &path)
                .json(&json!({ "userId": user_id })),
        )
        .await?;
        Ok(())
    }

    async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Vec<ReactionCount>, StoreError> {
        let path = format!("/internal/messages/{message_id}/reactions");
        let response = self
            .send(
                self.request(reqwest::Method::POST, &path)
                    .json(&json!({ "userId": user_id, "emoji": emoji })),
            )
            .await
            .map_err(|err| match err {
                StoreError::ChatNotFound => StoreError::MessageNotFound,
                other => other,
            })?;
        let reply: ReactionsReply = response
            .json()
            .await
            .map_err(|err| StoreError::Rejected(err.to_string()))?;
        Ok(reply.reactions)
    }

    async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Vec<ReactionCount>, StoreError> {
        let path = format!("/internal/messages/{message_id}/reactions/{emoji}?userId={user_id}");
        let response = self
            .send(self.request(reqwest::Method::DELETE, &path))
            .await
            .map_err(|err| match err {
                StoreError::ChatNotFound => StoreError::MessageNotFound,
                other => other,
            })?;
        let reply: ReactionsReply = response
            .json()
            .await
            .map_err(|err| StoreError::Rejected(err.to_string()))?;
        Ok(reply.reactions)
    }

    async fn create_message(&self, message: NewMessage) -> Result<serde_json::Value, StoreError> {
        let path = format!("/internal/chats/{}/messages", message.chat_id);
        let response = self
            .send(self.request(reqwest::Method::POST, &path).json(&json!({
                "senderId": message.sender_id,
                "content": message.content,
                "messageType": message.message_type,
                "replyToId": message.reply_to_id,
            })))
            .await?;
        response
            .json()
            .await
            .map_err(|err| StoreError::Rejected(err.to_string()))
    }
}
