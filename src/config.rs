//! Application configuration.
//!
//! Loaded once at startup from an optional `ragflow.toml` in the data
//! directory, with environment variable overrides for settings that differ
//! between deployments. The resulting `AppConfig` is immutable and handed
//! to each component explicitly; nothing re-reads configuration at request
//! time.

use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub documents_db_path: PathBuf,
    pub index_db_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let data_dir = discover_data_dir();
        let log_dir = data_dir.join("logs");
        let documents_db_path = data_dir.join("documents.db");
        let index_db_path = data_dir.join("vectors.db");

        for dir in [&data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            data_dir,
            log_dir,
            documents_db_path,
            index_db_path,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("RAGFLOW_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if cfg!(debug_assertions) {
        return env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("data");
    }

    let xdg = env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
        home_dir()
            .join(".local/share")
            .to_string_lossy()
            .to_string()
    });
    PathBuf::from(xdg).join("ragflow")
}

fn home_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Chunking parameters used at ingestion time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks.
    pub chunk_overlap: usize,
    /// Hard cap on chunks per document.
    pub max_chunks_per_document: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_chunks_per_document: 1000,
        }
    }
}

/// Embedding model pinned to the vector index. Changing the model
/// invalidates every stored vector, so the index refuses to open against a
/// different model name than the one it was created with.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    /// Chunks per embedding request.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "all-minilm".to_string(),
            dimension: 384,
            batch_size: 10,
        }
    }
}

/// A single configured chat provider. Priority is the position in the
/// `providers` list; the first entry is the default.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider kind: "gemini" or "ollama".
    pub kind: String,
    /// Registry name; defaults to the kind.
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Prompt token budget for this provider.
    pub token_limit: Option<usize>,
}

impl ProviderConfig {
    pub fn registry_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Default number of chunks handed to the chat orchestrator.
    pub max_context_chunks: usize,
    /// Character budget for assembled context.
    pub max_context_length: usize,
    /// Results below this similarity are dropped from chat context.
    pub score_floor: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_context_chunks: 5,
            max_context_length: 4000,
            score_floor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub providers: Vec<ProviderConfig>,
}

impl AppConfig {
    /// Loads `ragflow.toml` from the data directory if present, then applies
    /// environment overrides. A missing file means defaults.
    pub fn load(paths: &AppPaths) -> anyhow::Result<Self> {
        let config_path = paths.data_dir.join("ragflow.toml");
        let mut config: AppConfig = if config_path.exists() {
            let raw = fs::read_to_string(&config_path)?;
            toml::from_str(&raw)?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();

        if config.providers.is_empty() {
            config.providers = default_providers();
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(url) = env::var("RAGFLOW_EMBEDDING_URL") {
            self.embedding.base_url = url;
        }
        if let Ok(model) = env::var("RAGFLOW_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(key) = env::var("GOOGLE_API_KEY") {
            for provider in &mut self.providers {
                if provider.kind == "gemini" && provider.api_key.is_none() {
                    provider.api_key = Some(key.clone());
                }
            }
        }
    }

    /// Rejects settings that would otherwise fail deep inside the pipeline.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be positive");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!("chunking.chunk_overlap must be smaller than chunk_size");
        }
        if self.embedding.dimension == 0 {
            anyhow::bail!("embedding.dimension must be positive");
        }
        if self.providers.is_empty() {
            anyhow::bail!("at least one chat provider must be configured");
        }
        Ok(())
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    let mut providers = Vec::new();

    if let Ok(key) = env::var("GOOGLE_API_KEY") {
        providers.push(ProviderConfig {
            kind: "gemini".to_string(),
            name: None,
            base_url: None,
            api_key: Some(key),
            model: Some("gemini-2.0-flash-exp".to_string()),
            token_limit: None,
        });
    }

    providers.push(ProviderConfig {
        kind: "ollama".to_string(),
        name: None,
        base_url: Some(
            env::var("RAGFLOW_OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string()),
        ),
        api_key: None,
        model: Some("llama3.2".to_string()),
        token_limit: None,
    });

    providers
}
