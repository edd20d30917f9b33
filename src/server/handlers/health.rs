//! Service health endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness: the process is up and serving.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: the document store answers and at least one chat provider
/// is marked healthy.
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let store_ok = state.documents.count_completed(None).await.is_ok();
    let providers = state.registry.health_snapshot();
    let provider_ok = providers.values().any(|healthy| *healthy);

    let ready = store_ok && provider_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "ready": ready,
            "document_store": store_ok,
            "providers": providers,
        })),
    )
}
