pub mod generation;
pub mod health;
pub mod usage;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Generation API — submit / poll / download
        .route("/api/v1/generations", post(generation::handle_submit))
        .route("/api/v1/generations/:id", get(generation::handle_status))
        .route(
            "/api/v1/generations/:id/download",
            get(generation::handle_download),
        )
        // Synchronous compatibility scoring
        .route("/api/v1/score", post(generation::handle_score))
        // Usage dashboard
        .route("/api/v1/usage", get(usage::handle_usage))
        .with_state(state)
}
