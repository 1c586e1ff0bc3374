//! The Conversation Store collaborator: message persistence, read tracking
//! and reaction storage live in the CRUD backend, not here. This layer only
//! asks it questions and notifies about the answers.

use async_trait::async_trait;
use thiserror::Error;

use pawlink_models::events::ReactionCount;

mod http;
mod memory;

pub use http::HttpConversationStore;
pub use memory::MemoryConversationStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chat not found")]
    ChatNotFound,
    #[error("message not found")]
    MessageNotFound,
    #[error("conversation store unavailable: {0}")]
    Unavailable(String),
    #[error("conversation store rejected the request: {0}")]
    Rejected(String),
}

/// Fields of the deprecated write-through message path.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
    pub reply_to_id: Option<String>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Whether `user_id` is a participant of `chat_id`. The access guard for
    /// every conversation-scoped operation.
    async fn is_participant(&self, chat_id: &str, user_id: &str) -> Result<bool, StoreError>;

    /// Mark everything in the chat read for this user.
    async fn mark_messages_read(&self, chat_id: &str, user_id: &str) -> Result<(), StoreError>;

    /// Returns the updated reaction tally for the message.
    async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Vec<ReactionCount>, StoreError>;

    async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Vec<ReactionCount>, StoreError>;

    /// Deprecated write-through path; returns the persisted message as the
    /// store rendered it.
    async fn create_message(&self, message: NewMessage) -> Result<serde_json::Value, StoreError>;
}
