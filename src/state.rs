//! Shared application state.
//!
//! Built once at startup and handed to the router as an `Arc`. Every
//! component is constructed here so wiring lives in one place and the
//! handlers stay thin.

use std::sync::Arc;

use crate::chat::ChatOrchestrator;
use crate::config::{AppConfig, AppPaths};
use crate::documents::DocumentStore;
use crate::embedding::HttpEmbeddingProvider;
use crate::index::SqliteVectorIndex;
use crate::ingest::IngestionPipeline;
use crate::providers::ProviderRegistry;
use crate::retrieval::RetrievalEngine;

pub struct AppState {
    pub config: AppConfig,
    pub documents: DocumentStore,
    pub pipeline: Arc<IngestionPipeline>,
    pub retrieval: Arc<RetrievalEngine>,
    pub chat: ChatOrchestrator,
    pub registry: Arc<ProviderRegistry>,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<Arc<Self>> {
        let paths = AppPaths::new();
        let config = AppConfig::load(&paths)?;

        tracing::info!("Data directory: {}", paths.data_dir.display());

        let documents = DocumentStore::new(&paths.documents_db_path)
            .await
            .map_err(|e| anyhow::anyhow!("document store init failed: {e}"))?;

        let embedder = Arc::new(HttpEmbeddingProvider::new(&config.embedding));

        let index = Arc::new(
            SqliteVectorIndex::open(&paths.index_db_path, &config.embedding.model)
                .await
                .map_err(|e| anyhow::anyhow!("vector index init failed: {e}"))?,
        );

        let pipeline = Arc::new(IngestionPipeline::new(
            documents.clone(),
            index.clone(),
            embedder.clone(),
            config.chunking.clone(),
            &config.embedding,
            paths.data_dir.join("uploads"),
        ));

        let retrieval = Arc::new(RetrievalEngine::new(
            embedder,
            index,
            documents.clone(),
        ));

        let registry = Arc::new(ProviderRegistry::from_config(&config.providers));
        tracing::info!("Chat providers: {:?}", registry.list_providers());

        let chat = ChatOrchestrator::new(
            retrieval.clone(),
            documents.clone(),
            registry.clone(),
            config.retrieval.clone(),
        );

        Ok(Arc::new(Self {
            config,
            documents,
            pipeline,
            retrieval,
            chat,
            registry,
        }))
    }
}
