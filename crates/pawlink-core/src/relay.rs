use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use pawlink_models::broker::{
    chat_channel, status_channel, typing_channel, BrokerKind, SYSTEM_CHANNEL,
};
use pawlink_models::events::ServerEvent;
use pawlink_models::ids::{ConnectionId, Room};

use crate::broker::{MessageBroker, Publish};
use crate::rooms::RoomRegistry;

/// Outbound frames travel to each connection's writer task over an
/// unbounded channel, which preserves per-connection FIFO order.
pub type OutboundSender = mpsc::UnboundedSender<ServerEvent>;

struct RelayInner {
    rooms: RoomRegistry,
    connections: DashMap<ConnectionId, OutboundSender>,
}

impl RelayInner {
    fn fan_out(&self, room: &Room, event: &ServerEvent, except: Option<ConnectionId>) {
        for member in self.rooms.members_of(room) {
            if Some(member) == except {
                continue;
            }
            self.send_to(member, event.clone());
        }
    }

    fn send_to(&self, connection: ConnectionId, event: ServerEvent) {
        if let Some(sender) = self.connections.get(&connection) {
            // A closed receiver means the connection is mid-teardown.
            let _ = sender.send(event);
        }
    }
}

/// Fan-out layer between components and live connections. Every chat-room
/// broadcast flows through the broker as a channel publish; the relay's own
/// channel handlers do the local delivery, so swapping [`LocalTransport`]
/// for a distributed one changes no caller.
///
/// [`LocalTransport`]: crate::broker::LocalTransport
pub struct BroadcastRelay {
    inner: Arc<RelayInner>,
    broker: Arc<MessageBroker>,
}

impl BroadcastRelay {
    pub fn new(broker: Arc<MessageBroker>) -> Self {
        let inner = Arc::new(RelayInner {
            rooms: RoomRegistry::new(),
            connections: DashMap::new(),
        });

        // System-wide announcements go to every live connection.
        let system = Arc::clone(&inner);
        broker.subscribe(SYSTEM_CHANNEL, Arc::new(move |message| {
            let Some(event) = decode_payload(&message.payload) else {
                return;
            };
            for entry in system.connections.iter() {
                let _ = entry.value().send(event.clone());
            }
        }));

        Self { inner, broker }
    }

    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    pub fn register(&self, connection: ConnectionId, sender: OutboundSender) {
        self.inner.connections.insert(connection, sender);
    }

    pub fn unregister(&self, connection: ConnectionId) {
        self.inner.connections.remove(&connection);
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Join a room, wiring up its broker channel subscriptions when the room
    /// comes alive.
    pub fn join(&self, connection: ConnectionId, room: Room) {
        if self.inner.rooms.join(connection, room.clone()) {
            for channel in room_channels(&room) {
                let inner = Arc::clone(&self.inner);
                let target = room.clone();
                self.broker.subscribe(channel, Arc::new(move |message| {
                    let Some(event) = decode_payload(&message.payload) else {
                        return;
                    };
                    inner.fan_out(&target, &event, message.origin_connection);
                }));
            }
        }
    }

    pub fn leave(&self, connection: ConnectionId, room: &Room) {
        if self.inner.rooms.leave(connection, room) {
            for channel in room_channels(room) {
                self.broker.unsubscribe(&channel);
            }
        }
    }

    /// Disconnect path: leave every joined room, dropping subscriptions of
    /// rooms that emptied.
    pub fn drop_connection(&self, connection: ConnectionId) {
        for room in self.inner.rooms.drop_connection(connection) {
            for channel in room_channels(&room) {
                self.broker.unsubscribe(&channel);
            }
        }
    }

    pub fn members_of(&self, room: &Room) -> Vec<ConnectionId> {
        self.inner.rooms.members_of(room)
    }

    /// Broadcast into a chat room. `except` carries `socket.to(room)`
    /// semantics: the triggering connection does not hear its own event.
    /// Best-effort: a broker failure is logged, never propagated.
    pub fn to_chat(
        &self,
        chat_id: &str,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) {
        let mut draft =
            Publish::new(BrokerKind::Message, encode_payload(&event)).conversation(chat_id);
        if let Some(origin) = except {
            draft = draft.from_connection(origin);
        }
        if let Err(err) = self.broker.publish(&chat_channel(chat_id), draft) {
            tracing::warn!(chat_id, error = %err, "chat broadcast dropped");
        }
    }

    /// Typing traffic has its own channel so a distributed transport can
    /// treat it as droppable.
    pub fn to_chat_typing(
        &self,
        chat_id: &str,
        user_id: &str,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) {
        let mut draft = Publish::new(BrokerKind::Typing, encode_payload(&event))
            .conversation(chat_id)
            .user(user_id);
        if let Some(origin) = except {
            draft = draft.from_connection(origin);
        }
        if let Err(err) = self.broker.publish(&typing_channel(chat_id), draft) {
            tracing::warn!(chat_id, user_id, error = %err, "typing broadcast dropped");
        }
    }

    /// Presence change for one user, fanned out to that user's own room for
    /// multi-device sync.
    pub fn publish_status(&self, user_id: &str, event: ServerEvent) {
        let draft = Publish::new(BrokerKind::Presence, encode_payload(&event)).user(user_id);
        if let Err(err) = self.broker.publish(&status_channel(user_id), draft) {
            tracing::warn!(user_id, error = %err, "presence publish dropped");
        }
    }

    pub fn system_broadcast(&self, event: ServerEvent) {
        let draft = Publish::new(BrokerKind::System, encode_payload(&event));
        if let Err(err) = self.broker.publish(SYSTEM_CHANNEL, draft) {
            tracing::warn!(error = %err, "system broadcast dropped");
        }
    }

    /// Direct notification into a user's room, bypassing the broker — the
    /// CRUD backend calls this on this very process.
    pub fn notify_user(&self, user_id: &str, event: ServerEvent) {
        self.inner.fan_out(&Room::user(user_id), &event, None);
    }

    /// Caller-only reply (presence queries, scoped errors).
    pub fn to_connection(&self, connection: ConnectionId, event: ServerEvent) {
        self.inner.send_to(connection, event);
    }
}

fn room_channels(room: &Room) -> Vec<String> {
    match room {
        Room::Chat(id) => vec![chat_channel(id), typing_channel(id)],
        Room::User(id) => vec![status_channel(id)],
    }
}

fn encode_payload(event: &ServerEvent) -> serde_json::Value {
    serde_json::json!({ "event": event.event, "data": event.data })
}

fn decode_payload(payload: &serde_json::Value) -> Option<ServerEvent> {
    match serde_json::from_value(payload.clone()) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!(error = %err, "undecodable broker payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn connect(relay: &BroadcastRelay) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        relay.register(id, tx);
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn chat_broadcast_skips_the_origin_connection() {
        let relay = BroadcastRelay::new(Arc::new(MessageBroker::local("server-a")));
        let (a, mut a_rx) = connect(&relay);
        let (b, mut b_rx) = connect(&relay);
        relay.join(a, Room::chat("c1"));
        relay.join(b, Room::chat("c1"));

        relay.to_chat(
            "c1",
            ServerEvent::new("user_joined_chat", json!({"userId": "ua"})),
            Some(a),
        );

        assert!(drain(&mut a_rx).is_empty());
        let received = drain(&mut b_rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event, "user_joined_chat");
    }

    #[tokio::test]
    async fn broadcast_without_origin_reaches_everyone_in_the_room_only() {
        let relay = BroadcastRelay::new(Arc::new(MessageBroker::local("server-a")));
        let (a, mut a_rx) = connect(&relay);
        let (b, mut b_rx) = connect(&relay);
        let (outsider, mut outsider_rx) = connect(&relay);
        relay.join(a, Room::chat("c1"));
        relay.join(b, Room::chat("c1"));
        relay.join(outsider, Room::chat("c2"));

        relay.to_chat("c1", ServerEvent::new("new_message", json!({})), None);

        assert_eq!(drain(&mut a_rx).len(), 1);
        assert_eq!(drain(&mut b_rx).len(), 1);
        assert!(drain(&mut outsider_rx).is_empty());
    }

    #[tokio::test]
    async fn room_subscriptions_follow_membership() {
        let broker = Arc::new(MessageBroker::local("server-a"));
        let relay = BroadcastRelay::new(Arc::clone(&broker));
        // system:broadcast is always subscribed.
        assert_eq!(broker.status().subscription_count, 1);

        let (a, _a_rx) = connect(&relay);
        let (b, _b_rx) = connect(&relay);
        relay.join(a, Room::chat("c1"));
        assert_eq!(broker.status().subscription_count, 3);
        relay.join(b, Room::chat("c1"));
        assert_eq!(broker.status().subscription_count, 3);

        relay.leave(a, &Room::chat("c1"));
        assert_eq!(broker.status().subscription_count, 3);
        relay.leave(b, &Room::chat("c1"));
        assert_eq!(broker.status().subscription_count, 1);
    }

    #[tokio::test]
    async fn status_publish_fans_out_to_all_of_the_users_connections() {
        let relay = BroadcastRelay::new(Arc::new(MessageBroker::local("server-a")));
        let (tab, mut tab_rx) = connect(&relay);
        let (phone, mut phone_rx) = connect(&relay);
        relay.join(tab, Room::user("u1"));
        relay.join(phone, Room::user("u1"));

        relay.publish_status("u1", ServerEvent::new("own_presence_update", json!({"status": "away"})));

        assert_eq!(drain(&mut tab_rx).len(), 1);
        assert_eq!(drain(&mut phone_rx).len(), 1);
    }

    #[tokio::test]
    async fn system_broadcast_reaches_every_connection() {
        let relay = BroadcastRelay::new(Arc::new(MessageBroker::local("server-a")));
        let (a, mut a_rx) = connect(&relay);
        let (_b, mut b_rx) = connect(&relay);
        relay.join(a, Room::chat("c1"));

        relay.system_broadcast(ServerEvent::new("notification", json!({"title": "maintenance"})));

        assert_eq!(drain(&mut a_rx).len(), 1);
        assert_eq!(drain(&mut b_rx).len(), 1);
    }

    #[tokio::test]
    async fn notify_user_is_direct_and_scoped_to_the_users_room() {
        let relay = BroadcastRelay::new(Arc::new(MessageBroker::local("server-a")));
        let (tab, mut tab_rx) = connect(&relay);
        let (other, mut other_rx) = connect(&relay);
        relay.join(tab, Room::user("u1"));
        relay.join(other, Room::user("u2"));

        relay.notify_user(
            "u1",
            ServerEvent::new("notification", json!({"title": "New adoption application"})),
        );

        let received = drain(&mut tab_rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event, "notification");
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test]
    async fn drop_connection_stops_delivery_and_unsubscribes_empty_rooms() {
        let broker = Arc::new(MessageBroker::local("server-a"));
        let relay = BroadcastRelay::new(Arc::clone(&broker));
        let (a, mut a_rx) = connect(&relay);
        relay.join(a, Room::chat("c1"));
        relay.join(a, Room::user("u1"));

        relay.drop_connection(a);
        relay.unregister(a);
        assert_eq!(broker.status().subscription_count, 1);
        assert_eq!(relay.connection_count(), 0);

        relay.to_chat("c1", ServerEvent::new("new_message", json!({})), None);
        assert!(drain(&mut a_rx).is_empty());
    }
}
