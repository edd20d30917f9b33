//! Embedding provider boundary.
//!
//! One embedding model is pinned per deployment; both ingestion and query
//! encoding go through the same provider so stored vectors and query
//! vectors live in the same space.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::EmbeddingConfig;
use crate::errors::ProviderError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, recorded in the vector index meta table.
    fn model(&self) -> &str;

    /// Fixed output dimension of this model.
    fn dimension(&self) -> usize;

    /// Embeds a batch of texts, one vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint (Ollama,
/// LM Studio, and most hosted embedding APIs speak this shape).
pub struct HttpEmbeddingProvider {
    base_url: String,
    model: String,
    dimension: usize,
    client: Client,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": inputs,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = res.status();
        if status.as_u16() == 429 {
            let text = res.text().await.unwrap_or_default();
            return Err(ProviderError::RateLimited(text));
        }
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(ProviderError::Unavailable(format!("{status}: {text}")));
            }
            return Err(ProviderError::Rejected(format!("{status}: {text}")));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;

        let mut embeddings = Vec::with_capacity(inputs.len());
        if let Some(data) = payload["data"].as_array() {
            for item in data {
                if let Some(vals) = item["embedding"].as_array() {
                    let vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    embeddings.push(vec);
                }
            }
        }

        if embeddings.len() != inputs.len() {
            return Err(ProviderError::Rejected(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                embeddings.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(ProviderError::Rejected(format!(
                "embedding dimension {} does not match configured {}",
                bad.len(),
                self.dimension
            )));
        }

        Ok(embeddings)
    }
}
