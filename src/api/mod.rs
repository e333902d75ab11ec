pub mod error;
mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;
use error::ApiError;

pub fn create_router(state: Arc<AppState>) -> Router {
    let health_routes = Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready));

    let webhook_routes = Router::new().route("/webhook", post(webhooks::github_webhook));

    Router::new()
        .nest("/api/v1/health", health_routes)
        .nest("/api/v1/github/webhook", webhook_routes)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn live() -> &'static str {
    "live"
}

async fn ready() -> &'static str {
    "ready"
}

async fn not_found() -> ApiError {
    ApiError::not_found("route not found")
}
