use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::OnceLock;
use tokio::sync::mpsc;

use pawlink_core::auth::Claims;
use pawlink_core::error::GatewayError;
use pawlink_core::store::NewMessage;
use pawlink_core::AppState;
use pawlink_models::events::*;
use pawlink_models::ids::Room;

use crate::session::Session;

const MAX_MESSAGES_PER_MINUTE: u32 = 240;
const MAX_TYPING_EVENTS_PER_MINUTE: u32 = 120;
const MAX_PRESENCE_UPDATES_PER_MINUTE: u32 = 60;

/// Per-user limiters shared across all of a user's connections, so opening
/// more tabs does not widen the budget.
struct GatewayRateLimits {
    messages: DefaultKeyedRateLimiter<String>,
    typing: DefaultKeyedRateLimiter<String>,
    presence: DefaultKeyedRateLimiter<String>,
}

static RATE_LIMITS: OnceLock<GatewayRateLimits> = OnceLock::new();

fn rate_limits() -> &'static GatewayRateLimits {
    RATE_LIMITS.get_or_init(|| GatewayRateLimits {
        messages: RateLimiter::keyed(Quota::per_minute(
            NonZeroU32::new(MAX_MESSAGES_PER_MINUTE).unwrap(),
        )),
        typing: RateLimiter::keyed(Quota::per_minute(
            NonZeroU32::new(MAX_TYPING_EVENTS_PER_MINUTE).unwrap(),
        )),
        presence: RateLimiter::keyed(Quota::per_minute(
            NonZeroU32::new(MAX_PRESENCE_UPDATES_PER_MINUTE).unwrap(),
        )),
    })
}

/// High-frequency events are dropped without a reply when over budget; the
/// rest get a scoped error so the client can back off.
fn check_rate_limit(user_id: &str, event: &ClientEvent) -> Result<(), bool> {
    let limits = rate_limits();
    let key = user_id.to_string();
    let silent = matches!(
        event,
        ClientEvent::TypingStart { .. }
            | ClientEvent::TypingStop { .. }
            | ClientEvent::UpdatePresence { .. }
    );

    if limits.messages.check_key(&key).is_err() {
        return Err(silent);
    }
    let over = match event {
        ClientEvent::TypingStart { .. } | ClientEvent::TypingStop { .. } => {
            limits.typing.check_key(&key).is_err()
        }
        ClientEvent::UpdatePresence { .. } => limits.presence.check_key(&key).is_err(),
        _ => false,
    };
    if over {
        Err(silent)
    } else {
        Ok(())
    }
}

pub async fn handle_connection(socket: WebSocket, state: AppState, claims: Claims) {
    let session = Session::from_claims(claims);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

    bind_connection(&state, &session, outbound_tx);

    let (mut sender, mut receiver) = socket.split();
    let disconnect_reason = loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, &session, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) => break "client close frame",
                    Some(Ok(_)) => {} // ping/pong/binary
                    Some(Err(_)) => break "websocket receive error",
                    None => break "websocket stream ended",
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(event) => {
                        let Ok(frame) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break "websocket send error";
                        }
                    }
                    None => break "outbound channel closed",
                }
            }
        }
    };

    teardown_connection(&state, &session);
    tracing::info!(
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        reason = disconnect_reason,
        active = state.relay.connection_count(),
        "gateway connection closed"
    );
}

/// Runs before any event handler: register the outbound lane, auto-join the
/// user's own room, count the connection into presence.
fn bind_connection(state: &AppState, session: &Session, sender: pawlink_core::relay::OutboundSender) {
    state.relay.register(session.connection_id, sender);
    state
        .relay
        .join(session.connection_id, Room::user(&session.user_id));

    if state
        .presence
        .connect(&session.user_id, session.connection_id)
    {
        announce_own_presence(state, &session.user_id);
    }

    tracing::info!(
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        role = %session.role,
        rescue_id = ?session.rescue_id,
        active = state.relay.connection_count(),
        "gateway connection established"
    );
}

/// Runs exactly once per connection, on the transition to disconnected.
/// Order matters: typing cleanup, then room membership, then presence.
fn teardown_connection(state: &AppState, session: &Session) {
    state.typing.clear_all_for(&session.user_id);
    state.relay.drop_connection(session.connection_id);
    if state
        .presence
        .disconnect(&session.user_id, session.connection_id)
    {
        announce_own_presence(state, &session.user_id);
    }
    state.relay.unregister(session.connection_id);
}

fn announce_own_presence(state: &AppState, user_id: &str) {
    let snapshot = state.presence.status_of(user_id);
    state.relay.publish_status(
        user_id,
        ServerEvent::new(
            EVENT_OWN_PRESENCE_UPDATE,
            json!({ "status": snapshot.status, "lastSeen": snapshot.last_seen }),
        ),
    );
}

async fn handle_text(state: &AppState, session: &Session, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            let decode = GatewayError::Decode(err.to_string());
            tracing::debug!(user_id = %session.user_id, error = %decode, "dropping malformed event");
            reply_error(state, session, "unknown", "Unrecognized event", &decode);
            return;
        }
    };

    if let Err(silent) = check_rate_limit(&session.user_id, &event) {
        if silent {
            tracing::debug!(user_id = %session.user_id, event = event.name(), "rate limited (silent drop)");
        } else {
            state.relay.to_connection(
                session.connection_id,
                ServerEvent::new(
                    EVENT_ERROR,
                    json!({
                        "event": event.name(),
                        "message": format!("Rate limit exceeded for {}", event.name()),
                    }),
                ),
            );
        }
        return;
    }

    let name = event.name();
    if let Err(err) = dispatch(state, session, event).await {
        tracing::warn!(
            user_id = %session.user_id,
            event = name,
            error = %err,
            "event handler failed"
        );
        reply_error(state, session, name, failure_message(name), &err);
    }
}

/// One uniform scoped reply for every dispatcher-boundary failure; nothing
/// is broadcast and the connection stays up.
fn reply_error(
    state: &AppState,
    session: &Session,
    event: &str,
    message: &str,
    err: &GatewayError,
) {
    let reply = ErrorReply {
        event: event.to_string(),
        message: message.to_string(),
        error: err.to_string(),
    };
    let data = serde_json::to_value(reply).unwrap_or_else(|_| json!({}));
    state
        .relay
        .to_connection(session.connection_id, ServerEvent::new(EVENT_ERROR, data));
}

fn failure_message(event: &str) -> &'static str {
    match event {
        "join_chat" => "Failed to join chat",
        "leave_chat" => "Failed to leave chat",
        "typing_start" | "typing_stop" => "Failed to update typing status",
        "mark_as_read" => "Failed to mark messages as read",
        "add_reaction" => "Failed to add reaction",
        "remove_reaction" => "Failed to remove reaction",
        "message_sent_notification" => "Failed to notify chat",
        "get_presence" => "Failed to fetch presence",
        "update_presence" => "Failed to update presence",
        "send_message" => "Failed to send message",
        _ => "Request failed",
    }
}

/// Every conversation-scoped operation runs through the access guard first.
async fn require_membership(
    state: &AppState,
    session: &Session,
    chat_id: &str,
) -> Result<(), GatewayError> {
    if state.store.is_participant(chat_id, &session.user_id).await? {
        Ok(())
    } else {
        Err(GatewayError::AccessDenied)
    }
}

async fn dispatch(
    state: &AppState,
    session: &Session,
    event: ClientEvent,
) -> Result<(), GatewayError> {
    match event {
        ClientEvent::JoinChat { chat_id } => {
            require_membership(state, session, &chat_id).await?;
            state.relay.join(session.connection_id, Room::chat(&chat_id));
            tracing::info!(user_id = %session.user_id, chat_id, "joined chat");
            state.relay.to_chat(
                &chat_id,
                ServerEvent::new(
                    EVENT_USER_JOINED_CHAT,
                    json!({
                        "userId": session.user_id,
                        "chatId": chat_id,
                        "timestamp": chrono::Utc::now(),
                    }),
                ),
                Some(session.connection_id),
            );
        }
        ClientEvent::LeaveChat { chat_id } => {
            require_membership(state, session, &chat_id).await?;
            state
                .relay
                .leave(session.connection_id, &Room::chat(&chat_id));
            tracing::info!(user_id = %session.user_id, chat_id, "left chat");
            state.relay.to_chat(
                &chat_id,
                ServerEvent::new(
                    EVENT_USER_LEFT_CHAT,
                    json!({
                        "userId": session.user_id,
                        "chatId": chat_id,
                        "timestamp": chrono::Utc::now(),
                    }),
                ),
                Some(session.connection_id),
            );
        }
        ClientEvent::TypingStart {
            chat_id,
            first_name,
            last_name,
        } => {
            require_membership(state, session, &chat_id).await?;
            state
                .typing
                .start(&chat_id, &session.user_id, &first_name, &last_name);
            state.relay.to_chat_typing(
                &chat_id,
                &session.user_id,
                ServerEvent::new(
                    EVENT_USER_TYPING,
                    json!({
                        "userId": session.user_id,
                        "firstName": first_name,
                        "lastName": last_name,
                        "chatId": chat_id,
                        "timestamp": chrono::Utc::now(),
                    }),
                ),
                Some(session.connection_id),
            );
        }
        ClientEvent::TypingStop { chat_id } => {
            require_membership(state, session, &chat_id).await?;
            state.typing.stop(&chat_id, &session.user_id);
            state.relay.to_chat_typing(
                &chat_id,
                &session.user_id,
                ServerEvent::new(
                    EVENT_USER_STOPPED_TYPING,
                    json!({
                        "userId": session.user_id,
                        "chatId": chat_id,
                        "timestamp": chrono::Utc::now(),
                    }),
                ),
                Some(session.connection_id),
            );
        }
        ClientEvent::MarkAsRead { chat_id } => {
            require_membership(state, session, &chat_id).await?;
            state
                .store
                .mark_messages_read(&chat_id, &session.user_id)
                .await?;
            state.relay.to_chat(
                &chat_id,
                ServerEvent::new(
                    EVENT_MESSAGES_READ,
                    json!({
                        "userId": session.user_id,
                        "chatId": chat_id,
                        "timestamp": chrono::Utc::now(),
                    }),
                ),
                Some(session.connection_id),
            );
        }
        ClientEvent::AddReaction {
            message_id,
            emoji,
            chat_id,
        } => {
            let reactions = state
                .store
                .add_reaction(&message_id, &session.user_id, &emoji)
                .await?;
            state.relay.to_chat(
                &chat_id,
                ServerEvent::new(
                    EVENT_REACTION_ADDED,
                    json!({
                        "messageId": message_id,
                        "emoji": emoji,
                        "userId": session.user_id,
                        "reactions": reactions,
                        "timestamp": chrono::Utc::now(),
                    }),
                ),
                None,
            );
        }
        ClientEvent::RemoveReaction {
            message_id,
            emoji,
            chat_id,
        } => {
            let reactions = state
                .store
                .remove_reaction(&message_id, &session.user_id, &emoji)
                .await?;
            state.relay.to_chat(
                &chat_id,
                ServerEvent::new(
                    EVENT_REACTION_REMOVED,
                    json!({
                        "messageId": message_id,
                        "emoji": emoji,
                        "userId": session.user_id,
                        "reactions": reactions,
                        "timestamp": chrono::Utc::now(),
                    }),
                ),
                None,
            );
        }
        ClientEvent::MessageSentNotification {
            message_id,
            conversation_id,
            temp_id,
        } => {
            require_membership(state, session, &conversation_id).await?;
            state.relay.to_chat(
                &conversation_id,
                ServerEvent::new(
                    EVENT_MESSAGE_NOTIFICATION,
                    json!({
                        "messageId": message_id,
                        "chatId": conversation_id,
                        "tempId": temp_id,
                        "senderId": session.user_id,
                        "timestamp": chrono::Utc::now(),
                    }),
                ),
                Some(session.connection_id),
            );
        }
        ClientEvent::GetPresence { user_ids } => {
            let statuses = state.presence.snapshot_for(&user_ids);
            state.relay.to_connection(
                session.connection_id,
                ServerEvent::new(
                    EVENT_PRESENCE_UPDATE,
                    serde_json::to_value(statuses)
                        .map_err(|err| GatewayError::Decode(err.to_string()))?,
                ),
            );
        }
        ClientEvent::UpdatePresence { status } => {
            state.presence.set_status(&session.user_id, status);
            announce_own_presence(state, &session.user_id);
        }
        ClientEvent::SendMessage {
            chat_id,
            content,
            message_type,
            reply_to_id,
        } => {
            // Deprecated write-through path, kept for old clients. New code
            // persists over REST and sends message_sent_notification.
            require_membership(state, session, &chat_id).await?;
            let message = state
                .store
                .create_message(NewMessage {
                    chat_id: chat_id.clone(),
                    sender_id: session.user_id.clone(),
                    content,
                    message_type: message_type.unwrap_or_else(|| "text".to_string()),
                    reply_to_id,
                })
                .await?;
            state.relay.to_chat(
                &chat_id,
                ServerEvent::new(
                    EVENT_NEW_MESSAGE,
                    json!({
                        "message": message,
                        "chatId": chat_id,
                        "timestamp": chrono::Utc::now(),
                    }),
                ),
                None,
            );
            // The sender is plainly no longer composing.
            state.typing.stop(&chat_id, &session.user_id);
        }
    }
    Ok(())
}
