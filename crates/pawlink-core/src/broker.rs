use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use pawlink_models::broker::{BrokerKind, BrokerMessage};
use pawlink_models::ids::ConnectionId;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker disconnected")]
    Disconnected,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Handler for envelopes arriving on one channel.
pub type ChannelHandler = Arc<dyn Fn(&BrokerMessage) + Send + Sync>;

/// An envelope before the broker stamps timestamp and origin server.
#[derive(Debug, Clone)]
pub struct Publish {
    pub kind: BrokerKind,
    pub payload: serde_json::Value,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
    pub origin_connection: Option<ConnectionId>,
}

impl Publish {
    pub fn new(kind: BrokerKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            conversation_id: None,
            user_id: None,
            origin_connection: None,
        }
    }

    pub fn conversation(mut self, chat_id: &str) -> Self {
        self.conversation_id = Some(chat_id.to_string());
        self
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn from_connection(mut self, connection: ConnectionId) -> Self {
        self.origin_connection = Some(connection);
        self
    }
}

/// The cross-process side of the relay. The in-process deployment uses
/// [`LocalTransport`]; a distributed deployment would serialize the envelope
/// out here and feed envelopes from other processes back through
/// [`MessageBroker::handle_incoming`].
pub trait BrokerTransport: Send + Sync {
    fn forward(&self, channel: &str, message: &BrokerMessage) -> Result<(), BrokerError>;
}

/// Single-process transport: nothing to forward, local dispatch already
/// happened in `publish`.
#[derive(Default)]
pub struct LocalTransport;

impl BrokerTransport for LocalTransport {
    fn forward(&self, _channel: &str, _message: &BrokerMessage) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Publish/subscribe boundary between "an event happened" and "who receives
/// it". Channel names are global strings, never process-local handles, so a
/// distributed transport can be dropped in without touching any caller.
pub struct MessageBroker {
    transport: Arc<dyn BrokerTransport>,
    handlers: DashMap<String, ChannelHandler>,
    instance_id: String,
    connected: AtomicBool,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStatus {
    pub connected: bool,
    pub instance_id: String,
    pub subscription_count: usize,
}

impl MessageBroker {
    pub fn new(instance_id: impl Into<String>, transport: Arc<dyn BrokerTransport>) -> Self {
        let instance_id = instance_id.into();
        tracing::info!(instance_id, "message broker initialized");
        Self {
            transport,
            handlers: DashMap::new(),
            instance_id,
            connected: AtomicBool::new(true),
        }
    }

    pub fn local(instance_id: impl Into<String>) -> Self {
        Self::new(instance_id, Arc::new(LocalTransport))
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Stamp and publish an envelope. The locally registered subscriber for
    /// the exact channel is invoked immediately; the transport carries the
    /// envelope to any other process.
    pub fn publish(&self, channel: &str, draft: Publish) -> Result<(), BrokerError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(BrokerError::Disconnected);
        }
        let message = BrokerMessage {
            kind: draft.kind,
            payload: draft.payload,
            conversation_id: draft.conversation_id,
            user_id: draft.user_id,
            timestamp: Utc::now(),
            server_id: self.instance_id.clone(),
            origin_connection: draft.origin_connection,
        };
        self.transport.forward(channel, &message)?;
        self.dispatch_local(channel, &message);
        Ok(())
    }

    /// Entry point for envelopes arriving from other processes. Envelopes
    /// this instance published are dropped here — that is the loop guard the
    /// origin-server stamp exists for.
    pub fn handle_incoming(&self, channel: &str, message: BrokerMessage) {
        if message.server_id == self.instance_id {
            return;
        }
        self.dispatch_local(channel, &message);
    }

    pub fn subscribe(&self, channel: impl Into<String>, handler: ChannelHandler) {
        let channel = channel.into();
        tracing::debug!(channel, "broker subscribe");
        self.handlers.insert(channel, handler);
    }

    pub fn unsubscribe(&self, channel: &str) {
        tracing::debug!(channel, "broker unsubscribe");
        self.handlers.remove(channel);
    }

    pub fn status(&self) -> BrokerStatus {
        BrokerStatus {
            connected: self.connected.load(Ordering::Relaxed),
            instance_id: self.instance_id.clone(),
            subscription_count: self.handlers.len(),
        }
    }

    /// Drop every subscription and refuse further publishes.
    pub fn shutdown(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.handlers.clear();
        tracing::info!(instance_id = %self.instance_id, "message broker disconnected");
    }

    fn dispatch_local(&self, channel: &str, message: &BrokerMessage) {
        // Clone the Arc out so the handler runs without holding the shard.
        let handler = self.handlers.get(channel).map(|h| Arc::clone(&h));
        if let Some(handler) = handler {
            handler(message);
        }
    }
}
