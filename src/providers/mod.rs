//! Chat provider abstraction and the process-wide provider registry.

mod gemini;
mod ollama;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::errors::ProviderError;

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;

/// Default prompt budget when a provider does not declare one.
const DEFAULT_TOKEN_LIMIT: usize = 8192;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name as it appears in the registry (e.g. "gemini").
    fn name(&self) -> &str;

    /// Cheap reachability probe.
    async fn health_check(&self) -> bool;

    /// Single non-streaming completion.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<String, ProviderError>;
}

struct RegisteredProvider {
    name: String,
    token_limit: usize,
    provider: Arc<dyn ChatProvider>,
}

/// Read-mostly registry of chat providers, built once at startup from
/// configuration. Priority is list order; the first entry is the default.
/// Health marks are the only mutation and sit behind an `RwLock`, so
/// in-flight requests always read a provider as fully healthy or fully
/// unhealthy.
pub struct ProviderRegistry {
    providers: Vec<RegisteredProvider>,
    health: RwLock<HashMap<String, bool>>,
}

impl ProviderRegistry {
    pub fn from_config(configs: &[ProviderConfig]) -> Self {
        let mut providers: Vec<RegisteredProvider> = Vec::new();

        for config in configs {
            let name = config.registry_name().to_string();
            let provider: Option<Arc<dyn ChatProvider>> = match config.kind.as_str() {
                "gemini" => match &config.api_key {
                    Some(key) => Some(Arc::new(GeminiProvider::new(
                        name.clone(),
                        key.clone(),
                        config.model.as_deref().unwrap_or("gemini-2.0-flash-exp"),
                    ))),
                    None => {
                        tracing::warn!("Skipping gemini provider '{}': no API key", name);
                        None
                    }
                },
                "ollama" => Some(Arc::new(OllamaProvider::new(
                    name.clone(),
                    config
                        .base_url
                        .as_deref()
                        .unwrap_or("http://localhost:11434"),
                    config.model.as_deref().unwrap_or("llama3.2"),
                ))),
                other => {
                    tracing::warn!("Unknown provider kind '{}' ignored", other);
                    None
                }
            };

            if let Some(provider) = provider {
                providers.push(RegisteredProvider {
                    name,
                    token_limit: config.token_limit.unwrap_or(DEFAULT_TOKEN_LIMIT),
                    provider,
                });
            }
        }

        if providers.is_empty() {
            tracing::warn!("No chat providers configured; chat requests will fail");
        }

        let health = providers.iter().map(|p| (p.name.clone(), true)).collect();

        Self {
            providers,
            health: RwLock::new(health),
        }
    }

    /// Registry built from already-constructed providers, in priority
    /// order. Used by tests to inject mocks.
    pub fn from_providers(providers: Vec<(Arc<dyn ChatProvider>, usize)>) -> Self {
        let providers: Vec<RegisteredProvider> = providers
            .into_iter()
            .map(|(provider, token_limit)| RegisteredProvider {
                name: provider.name().to_string(),
                token_limit,
                provider,
            })
            .collect();
        let health = providers.iter().map(|p| (p.name.clone(), true)).collect();
        Self {
            providers,
            health: RwLock::new(health),
        }
    }

    pub fn list_providers(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }

    pub fn default_provider(&self) -> Option<String> {
        self.providers.first().map(|p| p.name.clone())
    }

    pub fn token_limit(&self, name: &str) -> usize {
        self.providers
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.token_limit)
            .unwrap_or(DEFAULT_TOKEN_LIMIT)
    }

    /// The fail-over chain for a request: the requested (or default)
    /// provider first, then the remaining providers in priority order.
    pub fn chain_for(&self, requested: Option<&str>) -> Vec<Arc<dyn ChatProvider>> {
        let first = requested
            .map(str::to_string)
            .or_else(|| self.default_provider());

        let Some(first) = first else {
            return Vec::new();
        };

        let mut chain: Vec<Arc<dyn ChatProvider>> = Vec::with_capacity(self.providers.len());
        if let Some(p) = self.providers.iter().find(|p| p.name == first) {
            chain.push(p.provider.clone());
        }
        for p in &self.providers {
            if p.name != first {
                chain.push(p.provider.clone());
            }
        }
        chain
    }

    pub fn is_healthy(&self, name: &str) -> bool {
        self.health
            .read()
            .map(|h| h.get(name).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn set_health(&self, name: &str, healthy: bool) {
        if let Ok(mut health) = self.health.write() {
            if let Some(entry) = health.get_mut(name) {
                *entry = healthy;
            }
        }
    }

    pub fn health_snapshot(&self) -> HashMap<String, bool> {
        self.health.read().map(|h| h.clone()).unwrap_or_default()
    }

    /// Probes every provider and refreshes the health map.
    pub async fn refresh_health(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for p in &self.providers {
            let healthy = p.provider.health_check().await;
            results.insert(p.name.clone(), healthy);
        }
        if let Ok(mut health) = self.health.write() {
            for (name, healthy) in &results {
                health.insert(name.clone(), *healthy);
            }
        }
        results
    }
}
