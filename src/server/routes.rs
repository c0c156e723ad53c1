//! Router configuration for the API server.

use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sources", get(handlers::list_sources).post(handlers::create_source))
        .route("/sources/state", get(handlers::all_source_states))
        .route("/sources/:id", patch(handlers::patch_source))
        .route("/sources/:id/ingest", post(handlers::trigger_ingest))
        .route("/permits", get(handlers::list_permits))
        .route("/permits/stats", get(handlers::permit_stats))
        .route("/permits/:id", get(handlers::get_permit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
