//! Semantic search endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::retrieval::SearchResult;
use crate::state::AppState;

const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 50;

#[derive(Debug, Deserialize)]
pub struct SemanticSearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    /// Restrict the search to these documents. An empty list matches
    /// nothing; absent means the whole corpus.
    pub document_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct QuickSearchParams {
    pub q: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub search_time_ms: u64,
}

pub async fn semantic(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SemanticSearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let started = Instant::now();
    let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K);
    let results = state
        .retrieval
        .retrieve(&request.query, top_k, request.document_ids.as_deref())
        .await?;

    Ok(Json(SearchResponse {
        query: request.query,
        total: results.len(),
        results,
        search_time_ms: started.elapsed().as_millis() as u64,
    }))
}

/// GET variant for quick queries; same engine, no document filter.
pub async fn quick(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QuickSearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let started = Instant::now();
    let top_k = params.top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K);
    let results = state.retrieval.retrieve(&params.q, top_k, None).await?;

    Ok(Json(SearchResponse {
        query: params.q,
        total: results.len(),
        results,
        search_time_ms: started.elapsed().as_millis() as u64,
    }))
}
