use serde::{Deserialize, Serialize};

use crate::presence::PresenceStatus;

// Outbound event names
pub const EVENT_USER_JOINED_CHAT: &str = "user_joined_chat";
pub const EVENT_USER_LEFT_CHAT: &str = "user_left_chat";
pub const EVENT_USER_TYPING: &str = "user_typing";
pub const EVENT_USER_STOPPED_TYPING: &str = "user_stopped_typing";
pub const EVENT_MESSAGES_READ: &str = "messages_read";
pub const EVENT_REACTION_ADDED: &str = "reaction_added";
pub const EVENT_REACTION_REMOVED: &str = "reaction_removed";
pub const EVENT_MESSAGE_NOTIFICATION: &str = "message_notification";
pub const EVENT_NEW_MESSAGE: &str = "new_message";
pub const EVENT_PRESENCE_UPDATE: &str = "presence_update";
pub const EVENT_OWN_PRESENCE_UPDATE: &str = "own_presence_update";
pub const EVENT_NOTIFICATION: &str = "notification";
pub const EVENT_ERROR: &str = "error";

/// Every named event a client may send, with its typed payload. Unknown
/// event names and malformed payloads fail decoding instead of being
/// silently ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinChat {
        chat_id: String,
    },
    LeaveChat {
        chat_id: String,
    },
    TypingStart {
        chat_id: String,
        first_name: String,
        last_name: String,
    },
    TypingStop {
        chat_id: String,
    },
    MarkAsRead {
        chat_id: String,
    },
    AddReaction {
        message_id: String,
        emoji: String,
        chat_id: String,
    },
    RemoveReaction {
        message_id: String,
        emoji: String,
        chat_id: String,
    },
    /// The message itself was already persisted over REST; this only asks
    /// the gateway to notify the other participants.
    MessageSentNotification {
        message_id: String,
        conversation_id: String,
        #[serde(default)]
        temp_id: Option<String>,
    },
    GetPresence {
        user_ids: Vec<String>,
    },
    UpdatePresence {
        status: PresenceStatus,
    },
    /// Deprecated write-through path. Message creation belongs to the
    /// conversation store; new clients persist over REST and send
    /// `message_sent_notification` instead.
    SendMessage {
        chat_id: String,
        content: String,
        #[serde(default)]
        message_type: Option<String>,
        #[serde(default)]
        reply_to_id: Option<String>,
    },
}

impl ClientEvent {
    /// The wire name, for logging and error replies.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinChat { .. } => "join_chat",
            ClientEvent::LeaveChat { .. } => "leave_chat",
            ClientEvent::TypingStart { .. } => "typing_start",
            ClientEvent::TypingStop { .. } => "typing_stop",
            ClientEvent::MarkAsRead { .. } => "mark_as_read",
            ClientEvent::AddReaction { .. } => "add_reaction",
            ClientEvent::RemoveReaction { .. } => "remove_reaction",
            ClientEvent::MessageSentNotification { .. } => "message_sent_notification",
            ClientEvent::GetPresence { .. } => "get_presence",
            ClientEvent::UpdatePresence { .. } => "update_presence",
            ClientEvent::SendMessage { .. } => "send_message",
        }
    }
}

/// One outbound frame: `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: serde_json::Value,
}

impl ServerEvent {
    pub fn new(event: &str, data: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

/// Scoped error reply sent to the offending connection only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub event: String,
    pub message: String,
    pub error: String,
}

/// Aggregated reaction state for one emoji on one message, as returned by
/// the conversation store after an add/remove.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: u32,
    pub users: Vec<String>,
}
