use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One active typer in a conversation, as surfaced to other participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUser {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub timestamp: DateTime<Utc>,
}
