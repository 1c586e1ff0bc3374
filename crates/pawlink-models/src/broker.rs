use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    Message,
    Typing,
    Presence,
    System,
}

/// The envelope exchanged through the broadcast relay. `server_id` stamps
/// the originating process so a distributed transport can drop envelopes it
/// published itself instead of re-broadcasting them forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerMessage {
    #[serde(rename = "type")]
    pub kind: BrokerKind,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub server_id: String,
    /// Connection that triggered this envelope. Process-local: used for
    /// `socket.to(room)`-style sender exclusion during local fan-out, never
    /// serialized to a remote transport.
    #[serde(skip)]
    pub origin_connection: Option<ConnectionId>,
}

// Channel naming convention shared with any future distributed transport.
pub fn chat_channel(chat_id: &str) -> String {
    format!("chat:{chat_id}")
}

pub fn typing_channel(chat_id: &str) -> String {
    format!("chat:{chat_id}:typing")
}

pub fn status_channel(user_id: &str) -> String {
    format!("user:{user_id}:status")
}

pub const SYSTEM_CHANNEL: &str = "system:broadcast";
