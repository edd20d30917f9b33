//! Chat orchestrator.
//!
//! Ties retrieval and generation together: fetch context for the user's
//! question, assemble a bounded prompt, and dispatch it across the
//! provider fail-over chain. Providers are tried in chain order; a
//! transient failure earns exactly one retry with backoff before the next
//! provider takes over.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::documents::DocumentStore;
use crate::errors::{ApiError, ProviderError};
use crate::providers::{ChatMessage, ChatProvider, GenerationOptions, ProviderRegistry};
use crate::retrieval::{excerpt, RetrievalEngine, SearchResult};

/// Hard ceiling on a single provider call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Backoff before the single retry of a transient failure.
const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_JITTER_MS: u64 = 100;
/// Conversation turns kept when replaying history into the prompt.
const HISTORY_WINDOW: usize = 10;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using the \
provided document context. Base your answer on the context below; if the context does not \
contain the answer, say so instead of guessing. Cite the source filenames you used.";

const EMPTY_CORPUS_ANSWER: &str = "I don't have any processed documents to search yet. \
Upload a document and try again once it has finished processing.";

const NO_CONTEXT_ANSWER: &str = "I couldn't find anything relevant to that question in the \
available documents.";

/// Per-request knobs. `top_k` falls back to the configured
/// `max_context_chunks` when absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    pub generation: GenerationOptions,
    pub top_k: Option<usize>,
}

/// Citation attached to a chat answer.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSource {
    pub document_id: Uuid,
    pub document_filename: String,
    pub excerpt: String,
    pub score: f32,
    pub chunk_index: i64,
}

/// Outcome of one chat turn. `success: false` means every provider in the
/// chain was exhausted; the reason is in `error`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatExchange {
    pub answer: String,
    pub sources: Vec<ChatSource>,
    pub provider_used: Option<String>,
    pub tokens_used: usize,
    pub success: bool,
    pub error: Option<String>,
}

impl ChatExchange {
    fn canned(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            sources: Vec::new(),
            provider_used: None,
            tokens_used: 0,
            success: true,
            error: None,
        }
    }
}

pub struct ChatOrchestrator {
    retrieval: Arc<RetrievalEngine>,
    documents: DocumentStore,
    registry: Arc<ProviderRegistry>,
    config: RetrievalConfig,
    request_timeout: Duration,
}

impl ChatOrchestrator {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        documents: DocumentStore,
        registry: Arc<ProviderRegistry>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            retrieval,
            documents,
            registry,
            config,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Full retrieval-augmented chat turn.
    pub async fn chat(
        &self,
        message: &str,
        history: &[ChatMessage],
        provider: Option<&str>,
        document_ids: Option<&[Uuid]>,
        options: ChatOptions,
    ) -> Result<ChatExchange, ApiError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ApiError::BadRequest("message cannot be empty".to_string()));
        }

        // Nothing completed means nothing retrievable; answer without
        // touching any provider.
        if self.documents.count_completed(document_ids).await? == 0 {
            return Ok(ChatExchange::canned(EMPTY_CORPUS_ANSWER));
        }

        let top_k = options.top_k.unwrap_or(self.config.max_context_chunks);
        let mut results = self.retrieval.retrieve(message, top_k, document_ids).await?;
        results.retain(|r| r.score >= self.config.score_floor);

        if results.is_empty() {
            return Ok(ChatExchange::canned(NO_CONTEXT_ANSWER));
        }

        let chain = self.registry.chain_for(provider);
        let token_limit = chain
            .first()
            .map(|p| self.registry.token_limit(p.name()))
            .unwrap_or_default();

        let (messages, kept) = assemble_prompt(
            message,
            history,
            &results,
            self.config.max_context_length,
            token_limit,
            options.generation.max_tokens as usize,
        );
        results.truncate(kept);

        let sources: Vec<ChatSource> = results
            .iter()
            .map(|r| ChatSource {
                document_id: r.document_id,
                document_filename: r.document_filename.clone(),
                excerpt: excerpt(&r.text),
                score: r.score,
                chunk_index: r.chunk_index,
            })
            .collect();

        let mut exchange = self.dispatch(&chain, &messages, options.generation).await;
        if exchange.success {
            exchange.sources = sources;
        }
        Ok(exchange)
    }

    /// Plain chat turn without retrieval. Shares the dispatch path, so
    /// retry and fail-over behave identically.
    pub async fn simple_chat(
        &self,
        message: &str,
        history: &[ChatMessage],
        provider: Option<&str>,
        generation: GenerationOptions,
    ) -> Result<ChatExchange, ApiError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ApiError::BadRequest("message cannot be empty".to_string()));
        }

        let mut messages = Vec::new();
        for turn in history.iter().rev().take(HISTORY_WINDOW).rev() {
            messages.push(turn.clone());
        }
        messages.push(ChatMessage::new("user", message));

        let chain = self.registry.chain_for(provider);
        Ok(self.dispatch(&chain, &messages, generation).await)
    }

    /// Walks the fail-over chain. Each provider gets one attempt plus one
    /// backed-off retry when the failure is transient; a provider that
    /// exhausts its retry is marked unhealthy before the chain moves on.
    async fn dispatch(
        &self,
        chain: &[Arc<dyn ChatProvider>],
        messages: &[ChatMessage],
        options: GenerationOptions,
    ) -> ChatExchange {
        let prompt_tokens: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();

        let mut failures: Vec<String> = Vec::new();

        for provider in chain {
            let name = provider.name().to_string();

            for attempt in 0..2 {
                if attempt > 0 {
                    let jitter = rand::rng().random_range(0..BACKOFF_JITTER_MS);
                    tokio::time::sleep(Duration::from_millis(BACKOFF_BASE_MS + jitter)).await;
                }

                let outcome = tokio::time::timeout(
                    self.request_timeout,
                    provider.generate(messages, options),
                )
                .await
                .unwrap_or(Err(ProviderError::Timeout(self.request_timeout)));

                match outcome {
                    Ok(answer) => {
                        self.registry.set_health(&name, true);
                        let tokens_used = prompt_tokens + estimate_tokens(&answer);
                        return ChatExchange {
                            answer,
                            sources: Vec::new(),
                            provider_used: Some(name),
                            tokens_used,
                            success: true,
                            error: None,
                        };
                    }
                    Err(err) if err.is_transient() && attempt == 0 => {
                        tracing::warn!("Provider '{}' failed transiently, retrying: {}", name, err);
                    }
                    Err(err) => {
                        tracing::warn!("Provider '{}' failed, moving on: {}", name, err);
                        self.registry.set_health(&name, false);
                        failures.push(format!("{name}: {err}"));
                        break;
                    }
                }
            }
        }

        let error = if failures.is_empty() {
            "no chat providers are configured".to_string()
        } else {
            format!("all providers failed ({})", failures.join("; "))
        };
        tracing::error!("Chat dispatch exhausted: {}", error);

        ChatExchange {
            answer: String::new(),
            sources: Vec::new(),
            provider_used: None,
            tokens_used: 0,
            success: false,
            error: Some(error),
        }
    }
}

/// Rough token estimate for budget purposes. No tokenizer is loaded;
/// four characters per token is close enough to keep prompts in bounds.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Builds the message list and returns how many retrieval results made it
/// into the context. Results arrive in rank order; when the budget is
/// exceeded, whole chunks are dropped from the low-ranked end so the best
/// evidence always survives.
fn assemble_prompt(
    message: &str,
    history: &[ChatMessage],
    results: &[SearchResult],
    max_context_chars: usize,
    token_limit: usize,
    answer_tokens: usize,
) -> (Vec<ChatMessage>, usize) {
    let history_tail: Vec<ChatMessage> = history
        .iter()
        .rev()
        .take(HISTORY_WINDOW)
        .rev()
        .cloned()
        .collect();

    let fixed_tokens: usize = estimate_tokens(SYSTEM_PROMPT)
        + estimate_tokens(message)
        + history_tail
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<usize>()
        + answer_tokens;

    // The character cap may already exclude trailing chunks; the token
    // budget then drops more from the low-ranked end.
    let mut kept = rendered_block_count(results, max_context_chars);
    loop {
        let context = render_context(&results[..kept]);
        if kept == 0 || fixed_tokens + estimate_tokens(&context) <= token_limit {
            let mut messages = Vec::with_capacity(history_tail.len() + 2);
            messages.push(ChatMessage::new(
                "system",
                format!("{SYSTEM_PROMPT}\n\nContext:\n{context}"),
            ));
            messages.extend(history_tail);
            messages.push(ChatMessage::new("user", message));
            return (messages, kept);
        }
        kept -= 1;
    }
}

fn context_block(result: &SearchResult) -> String {
    format!("[Source: {}]\n{}", result.document_filename, result.text)
}

/// How many leading results fit under the context character cap. Always at
/// least one so a single oversized chunk still produces an answer.
fn rendered_block_count(results: &[SearchResult], max_chars: usize) -> usize {
    let mut used = 0usize;
    let mut kept = 0usize;

    for result in results {
        let len = context_block(result).chars().count();
        if used + len > max_chars && kept > 0 {
            break;
        }
        used += len;
        kept += 1;
    }

    kept
}

fn render_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(context_block)
        .collect::<Vec<_>>()
        .join("\n\n")
}
