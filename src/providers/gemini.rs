//! Google Gemini chat provider.
//!
//! Talks to the `generateContent` REST endpoint. Gemini has no native
//! system role in this API shape, so the message list is flattened into a
//! single prompt with role prefixes.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ChatMessage, ChatProvider, GenerationOptions};
use crate::errors::ProviderError;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    name: String,
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(name: String, api_key: String, model: &str) -> Self {
        Self {
            name,
            api_key,
            model: model.to_string(),
            client: Client::new(),
        }
    }

    fn flatten_messages(messages: &[ChatMessage]) -> String {
        let mut parts = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role.as_str() {
                "system" => parts.push(format!("Instructions: {}", msg.content)),
                "assistant" => parts.push(format!("Assistant: {}", msg.content)),
                _ => parts.push(format!("User: {}", msg.content)),
            }
        }
        parts.join("\n\n")
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> bool {
        let url = format!(
            "{API_BASE}/models/{}?key={}",
            self.model, self.api_key
        );
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
        let url = format!(
            "{API_BASE}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let body = json!({
            "contents": [{
                "parts": [{ "text": Self::flatten_messages(messages) }]
            }],
            "generationConfig": {
                "maxOutputTokens": options.max_tokens,
                "temperature": options.temperature,
                "topP": 0.95,
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

        let content = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(ProviderError::Rejected(
                "empty response from gemini".to_string(),
            ));
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_flatten_with_role_prefixes() {
        let messages = vec![
            ChatMessage::new("system", "Be helpful."),
            ChatMessage::new("user", "Hi"),
            ChatMessage::new("assistant", "Hello!"),
        ];
        let prompt = GeminiProvider::flatten_messages(&messages);
        assert_eq!(prompt, "Instructions: Be helpful.\n\nUser: Hi\n\nAssistant: Hello!");
    }
}
