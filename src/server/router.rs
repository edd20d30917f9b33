//! Route table and middleware stack.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{chat, documents, health, search};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    // Multipart framing overhead on top of the raw file cap.
    let body_limit = state.config.server.max_upload_bytes + 64 * 1024;

    Router::new()
        .route("/documents/upload", post(documents::upload))
        .route("/documents", get(documents::list))
        .route("/documents/:id", get(documents::get_one))
        .route("/documents/:id", delete(documents::remove))
        .route("/documents/:id/content", get(documents::content))
        .route("/documents/:id/reprocess", post(documents::reprocess))
        .route("/search/semantic", post(search::semantic))
        .route("/search", get(search::quick))
        .route("/chat/", post(chat::chat))
        .route("/chat/simple", post(chat::simple))
        .route("/chat/providers", get(chat::providers))
        .route("/chat/health", get(chat::health))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
