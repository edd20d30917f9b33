//! Chat endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::chat::{ChatExchange, ChatOptions};
use crate::errors::ApiError;
use crate::providers::{ChatMessage, GenerationOptions};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    /// Preferred provider; fail-over still applies when it cannot answer.
    pub provider: Option<String>,
    /// Restrict retrieval to these documents.
    pub document_ids: Option<Vec<Uuid>>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Number of chunks retrieved as context.
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SimpleChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    pub provider: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

fn generation_options(max_tokens: Option<u32>, temperature: Option<f32>) -> GenerationOptions {
    let defaults = GenerationOptions::default();
    GenerationOptions {
        max_tokens: max_tokens.unwrap_or(defaults.max_tokens),
        temperature: temperature.unwrap_or(defaults.temperature),
    }
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatExchange>, ApiError> {
    let options = ChatOptions {
        generation: generation_options(request.max_tokens, request.temperature),
        top_k: request.max_results,
    };

    let exchange = state
        .chat
        .chat(
            &request.message,
            &request.conversation_history,
            request.provider.as_deref(),
            request.document_ids.as_deref(),
            options,
        )
        .await?;
    Ok(Json(exchange))
}

pub async fn simple(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SimpleChatRequest>,
) -> Result<Json<ChatExchange>, ApiError> {
    let exchange = state
        .chat
        .simple_chat(
            &request.message,
            &request.conversation_history,
            request.provider.as_deref(),
            generation_options(request.max_tokens, request.temperature),
        )
        .await?;
    Ok(Json(exchange))
}

pub async fn providers(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "providers": state.registry.list_providers(),
        "default": state.registry.default_provider(),
    }))
}

/// Live reachability probe: document store plus every configured provider.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let store_ok = state.documents.count_completed(None).await.is_ok();
    let providers = state.registry.refresh_health().await;
    Json(json!({
        "document_store": store_ok,
        "providers": providers,
    }))
}
