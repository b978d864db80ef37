//! Media Bridge (C5, spec §4.5): telephony voice webhooks and the
//! WebSocket media-stream endpoint that pipes caller audio to and from the
//! real-time model.

mod config;
mod session;
mod state;
mod usage_store;
mod webhook;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to postgres");

    let port = config.port;
    let call_semaphore = Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_calls));
    let state = AppState {
        db: pool,
        config: Arc::new(config),
        call_semaphore,
    };

    let app = Router::new()
        .route("/incoming-call/:scenario", post(webhook::incoming_call))
        .route(
            "/incoming-custom-call/:id",
            post(webhook::incoming_custom_call),
        )
        .route("/media-stream/:scenario", get(ws::media_stream))
        .route("/media-stream-custom/:id", get(ws::media_stream_custom))
        .route("/health", get(|| async { "ok" }))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "bridge service starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
