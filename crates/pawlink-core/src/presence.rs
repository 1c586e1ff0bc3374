use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

use pawlink_models::ids::ConnectionId;
use pawlink_models::presence::{PresenceSnapshot, PresenceStatus};

struct PresenceRecord {
    status: PresenceStatus,
    last_seen: DateTime<Utc>,
    connections: HashSet<ConnectionId>,
}

/// Connection-counted presence: any one of N open connections keeps the user
/// online; only the Nth disconnect flips them offline. Records are created
/// lazily and never deleted — a stale entry with zero connections already
/// reads as offline.
#[derive(Default)]
pub struct PresenceTracker {
    users: DashMap<String, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open connection. Returns true when this flipped the user
    /// from offline, i.e. a presence-changed notification should go out.
    pub fn connect(&self, user_id: &str, connection: ConnectionId) -> bool {
        let mut record = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| PresenceRecord {
                status: PresenceStatus::Offline,
                last_seen: Utc::now(),
                connections: HashSet::new(),
            });
        let came_online = record.connections.is_empty();
        record.connections.insert(connection);
        record.last_seen = Utc::now();
        if came_online {
            record.status = PresenceStatus::Online;
        }
        came_online
    }

    /// Deregister a connection. Returns true when this was the user's last
    /// open connection and they are now offline.
    pub fn disconnect(&self, user_id: &str, connection: ConnectionId) -> bool {
        let Some(mut record) = self.users.get_mut(user_id) else {
            return false;
        };
        if !record.connections.remove(&connection) {
            return false;
        }
        if record.connections.is_empty() {
            record.status = PresenceStatus::Offline;
            record.last_seen = Utc::now();
            true
        } else {
            false
        }
    }

    /// Explicit status override (e.g. `away` while a tab stays open). Never
    /// touches the connection set; an `offline` override with connections
    /// still open is ignored, the connection count is the source of truth.
    pub fn set_status(&self, user_id: &str, status: PresenceStatus) {
        let Some(mut record) = self.users.get_mut(user_id) else {
            return;
        };
        if status == PresenceStatus::Offline && !record.connections.is_empty() {
            tracing::warn!(user_id, "ignoring offline override with open connections");
            return;
        }
        record.status = status;
        record.last_seen = Utc::now();
    }

    pub fn status_of(&self, user_id: &str) -> PresenceSnapshot {
        self.users
            .get(user_id)
            .map(|record| PresenceSnapshot {
                status: record.status,
                last_seen: record.last_seen,
            })
            .unwrap_or(PresenceSnapshot {
                status: PresenceStatus::Offline,
                last_seen: Utc::now(),
            })
    }

    /// Answer a `get_presence` query for an arbitrary list of users.
    pub fn snapshot_for(&self, user_ids: &[String]) -> HashMap<String, PresenceSnapshot> {
        user_ids
            .iter()
            .map(|id| (id.clone(), self.status_of(id)))
            .collect()
    }
}
