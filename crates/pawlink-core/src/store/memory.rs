use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashSet;

use pawlink_models::events::ReactionCount;

use super::{ConversationStore, NewMessage, StoreError};

/// In-memory conversation store for development runs and tests. Chats and
/// their participant sets are seeded up front; reactions and messages live
/// only as long as the process.
#[derive(Default)]
pub struct MemoryConversationStore {
    participants: DashMap<String, HashSet<String>>,
    // message id -> per-emoji tally
    reactions: DashMap<String, Vec<ReactionCount>>,
    message_counter: std::sync::atomic::AtomicU64,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_chat(&self, chat_id: &str, participants: &[&str]) {
        self.participants.insert(
            chat_id.to_string(),
            participants.iter().map(|p| p.to_string()).collect(),
        );
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn is_participant(&self, chat_id: &str, user_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .participants
            .get(chat_id)
            .is_some_and(|members| members.contains(user_id)))
    }

    async fn mark_messages_read(&self, chat_id: &str, _user_id: &str) -> Result<(), StoreError> {
        if self.participants.contains_key(chat_id) {
            Ok(())
        } else {
            Err(StoreError::ChatNotFound)
        }
    }

    async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Vec<ReactionCount>, StoreError> {
        let mut tally = self.reactions.entry(message_id.to_string()).or_default();
        match tally.iter_mut().find(|r| r.emoji == emoji) {
            Some(entry) => {
                if !entry.users.iter().any(|u| u == user_id) {
                    entry.users.push(user_id.to_string());
                    entry.count += 1;
                }
            }
            None => tally.push(ReactionCount {
                emoji: emoji.to_string(),
                count: 1,
                users: vec![user_id.to_string()],
            }),
        }
        Ok(tally.clone())
    }

    async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Vec<ReactionCount>, StoreError> {
        let mut tally = self
            .reactions
            .get_mut(message_id)
            .ok_or(StoreError::MessageNotFound)?;
        if let Some(entry) = tally.iter_mut().find(|r| r.emoji == emoji) {
            if let Some(pos) = entry.users.iter().position(|u| u == user_id) {
                entry.users.remove(pos);
                entry.count -= 1;
            }
        }
        tally.retain(|r| r.count > 0);
        Ok(tally.clone())
    }

    async fn create_message(&self, message: NewMessage) -> Result<serde_json::Value, StoreError> {
        if !self
            .participants
            .get(&message.chat_id)
            .is_some_and(|members| members.contains(&message.sender_id))
        {
            return Err(StoreError::ChatNotFound);
        }
        let id = self
            .message_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(json!({
            "messageId": format!("mem-{id}"),
            "chatId": message.chat_id,
            "senderId": message.sender_id,
            "content": message.content,
            "messageType": message.message_type,
            "replyToId": message.reply_to_id,
            "createdAt": chrono::Utc::now(),
        }))
    }
}
