//! Ollama chat provider, using the native `/api/chat` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ChatMessage, ChatProvider, GenerationOptions};
use crate::errors::ProviderError;

pub struct OllamaProvider {
    name: String,
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(name: String, base_url: &str, model: &str) -> Self {
        Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            }
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

        let content = payload["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(ProviderError::Rejected(
                "empty response from ollama".to_string(),
            ));
        }

        Ok(content)
    }
}
