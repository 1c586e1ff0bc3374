use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle for one live WebSocket connection. A user with several
/// open tabs or devices holds several of these at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named fan-out group. `User` rooms carry direct notifications and
/// own-presence sync; `Chat` rooms carry per-conversation fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    User(String),
    Chat(String),
}

impl Room {
    pub fn user(user_id: impl Into<String>) -> Self {
        Room::User(user_id.into())
    }

    pub fn chat(chat_id: impl Into<String>) -> Self {
        Room::Chat(chat_id.into())
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{id}"),
            Room::Chat(id) => write!(f, "chat:{id}"),
        }
    }
}
