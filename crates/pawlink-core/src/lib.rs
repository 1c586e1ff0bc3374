pub mod auth;
pub mod broker;
pub mod error;
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod store;
pub mod typing;

use std::sync::Arc;

use serde_json::json;

use pawlink_models::events::{ServerEvent, EVENT_USER_STOPPED_TYPING};

use crate::broker::MessageBroker;
use crate::presence::PresenceTracker;
use crate::relay::BroadcastRelay;
use crate::store::ConversationStore;
use crate::typing::TypingIndicators;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
}

/// Shared state handed to every connection. Presence, typing and room
/// membership are each owned by their component; nothing reaches into
/// another component's map directly.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn ConversationStore>,
    pub presence: Arc<PresenceTracker>,
    pub typing: Arc<TypingIndicators>,
    pub relay: Arc<BroadcastRelay>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ConversationStore>,
        broker: Arc<MessageBroker>,
    ) -> Self {
        let relay = Arc::new(BroadcastRelay::new(broker));

        // Timer and disconnect evictions broadcast the stop themselves; an
        // explicit typing_stop is answered by the dispatcher instead.
        let expiry_relay = Arc::clone(&relay);
        let typing = Arc::new(TypingIndicators::new(Arc::new(
            move |chat_id: &str, user_id: &str| {
                expiry_relay.to_chat_typing(
                    chat_id,
                    user_id,
                    ServerEvent::new(
                        EVENT_USER_STOPPED_TYPING,
                        json!({
                            "userId": user_id,
                            "chatId": chat_id,
                            "timestamp": chrono::Utc::now(),
                        }),
                    ),
                    None,
                );
            },
        )));

        Self {
            config,
            store,
            presence: Arc::new(PresenceTracker::new()),
            typing,
            relay,
        }
    }
}
