use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pawlink_core::broker::MessageBroker;
use pawlink_core::store::{ConversationStore, HttpConversationStore, MemoryConversationStore};
use pawlink_core::{AppConfig, AppState};

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pawlink=info")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = config::Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    let store: Arc<dyn ConversationStore> = if config.store.base_url.is_empty() {
        tracing::warn!("no conversation store configured; using the in-memory dev store");
        Arc::new(MemoryConversationStore::new())
    } else {
        Arc::new(HttpConversationStore::new(
            &config.store.base_url,
            config.store.service_token.clone(),
        ))
    };

    let instance_id = if config.broker.instance_id.is_empty() {
        format!("server-{}", uuid::Uuid::new_v4())
    } else {
        config.broker.instance_id.clone()
    };
    let broker = Arc::new(MessageBroker::local(instance_id));

    let state = AppState::new(
        AppConfig {
            jwt_secret: config.auth.jwt_secret.clone(),
        },
        store,
        broker,
    );

    let app = Router::new()
        .merge(pawlink_ws::gateway_router())
        .route("/health", get(health))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %config.server.bind_address, "pawlink gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.relay.broker().shutdown();
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "broker": state.relay.broker().status(),
        "activeConnections": state.relay.connection_count(),
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
