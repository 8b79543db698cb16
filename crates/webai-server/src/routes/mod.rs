//! HTTP route handlers.

pub mod chat;
pub mod completions;
pub mod config;
pub mod docs;
pub mod generative;
pub mod messages;
pub mod models;
pub mod sessions;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use webai_chat::SessionRouter;

use crate::state::AppState;

/// Build the main Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(chat::routes())
        .merge(completions::routes())
        .merge(messages::routes())
        .merge(models::routes())
        .merge(generative::routes())
        .merge(sessions::routes())
        .merge(config::routes())
        .merge(docs::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "webai",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Periodically drop sessions idle past their TTL.
pub fn spawn_session_sweeper(
    router: Arc<SessionRouter>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            router.purge_expired();
        }
    })
}
