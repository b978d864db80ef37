//! HTTP surface for scenarios, usage stats, call dispatch, and the call-end
//! webhook (spec §6). The media-stream WebSocket and telephony voice webhook
//! live in `services/bridge`; the tick loop lives in `services/scheduler`.

mod config;
mod error;
mod handlers;
mod state;
mod usage_store;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use telephony::ProviderTelephonyClient;
use tower_http::cors::{Any, CorsLayer};
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

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let telephony = Arc::new(ProviderTelephonyClient::new(
        config.telephony_api_base.clone(),
        config.telephony_account_sid.clone(),
        config.telephony_auth_token.clone(),
    ));

    let port = config.port;
    let state = AppState::new(pool, &config, telephony);

    // Mobile clients live on a different origin than this API during
    // development; tighten before production.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route(
            "/mobile/check-call-permission",
            post(handlers::usage::check_permission),
        )
        .route("/mobile/make-call", post(handlers::calls::make_call))
        .route(
            "/mobile/schedule-call",
            post(handlers::calls::schedule_call),
        )
        .route("/mobile/usage-stats", get(handlers::usage::usage_stats))
        .route(
            "/realtime/custom-scenario",
            post(handlers::scenarios::create).get(handlers::scenarios::list),
        )
        .route(
            "/realtime/custom-scenario/:id",
            get(handlers::scenarios::get)
                .patch(handlers::scenarios::update)
                .delete(handlers::scenarios::delete),
        )
        .route("/call-end-webhook", post(handlers::webhook::call_end))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "api service starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
