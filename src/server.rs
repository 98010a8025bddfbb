use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

/// Builds the Axum `Router` with the load-control and metrics routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Load control ────────────────────────────────────────
        .route("/api/load/start", post(handlers::load::start_load))
        .route("/api/load/stop", post(handlers::load::stop_load))
        .route("/api/load/status", get(handlers::load::load_status))
        // ── Metrics ─────────────────────────────────────────────
        .route("/metrics", get(handlers::metrics::render))
        .with_state(state)
}
