use dashmap::DashMap;
use std::collections::HashSet;

use pawlink_models::ids::{ConnectionId, Room};

/// In-memory index: Room -> Set<ConnectionId> plus the reverse index so a
/// disconnect can leave every joined room without scanning. Membership is
/// ephemeral fan-out state, not a durability channel: a broadcast racing a
/// join may miss that connection.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<Room, HashSet<ConnectionId>>,
    joined: DashMap<ConnectionId, HashSet<Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Returns true when the room was empty before this join.
    pub fn join(&self, connection: ConnectionId, room: Room) -> bool {
        let mut members = self.rooms.entry(room.clone()).or_default();
        let was_empty = members.is_empty();
        members.insert(connection);
        drop(members);
        self.joined.entry(connection).or_default().insert(room);
        was_empty
    }

    /// Idempotent; no-op when absent. Returns true when the room is empty
    /// after this leave.
    pub fn leave(&self, connection: ConnectionId, room: &Room) -> bool {
        if let Some(mut joined) = self.joined.get_mut(&connection) {
            joined.remove(room);
        }
        match self.rooms.get_mut(room) {
            Some(mut members) => {
                members.remove(&connection);
                members.is_empty()
            }
            None => true,
        }
    }

    pub fn members_of(&self, room: &Room) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove the connection from every room it had joined; returns the
    /// rooms that became empty so their broker subscriptions can be dropped.
    pub fn drop_connection(&self, connection: ConnectionId) -> Vec<Room> {
        let joined = self
            .joined
            .remove(&connection)
            .map(|(_, rooms)| rooms)
            .unwrap_or_default();

        let mut emptied = Vec::new();
        for room in joined {
            if self.leave(connection, &room) {
                emptied.push(room);
            }
        }
        emptied
    }
}
