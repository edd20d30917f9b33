//! Ingestion pipeline.
//!
//! Drives each document through `pending -> processing -> {completed,
//! failed}`. Runs as a background task: the upload request returns as soon
//! as the document record exists, and every failure here is recorded on
//! that record instead of propagating to a request that already finished.
//!
//! Write ordering is chosen so a crash leaves the document store lagging
//! behind the index (a document never claims `completed` while its vectors
//! are missing), and the upsert is all-or-nothing so retrieval never sees
//! a partially indexed document.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::chunker::chunk_text;
use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::documents::DocumentStore;
use crate::embedding::EmbeddingProvider;
use crate::errors::{ApiError, IngestError};
use crate::extract::extract;
use crate::index::{IndexedChunk, VectorIndex};

pub struct IngestionPipeline {
    documents: DocumentStore,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
    embed_batch_size: usize,
    files_dir: PathBuf,
}

impl IngestionPipeline {
    pub fn new(
        documents: DocumentStore,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
        embedding: &EmbeddingConfig,
        files_dir: PathBuf,
    ) -> Self {
        let _ = std::fs::create_dir_all(&files_dir);
        Self {
            documents,
            index,
            embedder,
            chunking,
            embed_batch_size: embedding.batch_size.max(1),
            files_dir,
        }
    }

    fn file_path(&self, id: Uuid) -> PathBuf {
        self.files_dir.join(id.to_string())
    }

    /// Persists the raw upload so the document can be re-ingested later.
    pub async fn save_upload(&self, id: Uuid, bytes: &[u8]) -> Result<(), ApiError> {
        tokio::fs::write(self.file_path(id), bytes)
            .await
            .map_err(ApiError::internal)
    }

    /// Returns the persisted raw upload, e.g. for the content download
    /// endpoint.
    pub async fn read_upload(&self, id: Uuid) -> Result<Vec<u8>, ApiError> {
        tokio::fs::read(self.file_path(id)).await.map_err(|_| {
            ApiError::NotFound(format!("stored file for document {id} is missing"))
        })
    }

    /// Fire-and-forget ingestion. The task owns its own error handling.
    pub fn spawn(self: &Arc<Self>, id: Uuid) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            if let Err(err) = pipeline.run(id).await {
                tracing::error!("Ingestion task for {} did not complete: {}", id, err);
            }
        });
    }

    /// Runs one document through the full pipeline. Ingest-level failures
    /// (extraction, embedding, indexing) are terminal for the document and
    /// stored as its failure reason; only store-level faults bubble up.
    pub async fn run(&self, id: Uuid) -> Result<(), ApiError> {
        // Commit the processing transition before any work so readers
        // never observe work-in-progress on a still-pending record.
        self.documents.mark_processing(id).await?;

        match self.process(id).await {
            Ok(chunks_count) => {
                self.documents.mark_completed(id, chunks_count).await?;
                tracing::info!("Document {} ingested ({} chunks)", id, chunks_count);
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::warn!("Document {} failed ingestion: {}", id, reason);
                self.documents.mark_failed(id, &reason).await?;
                Ok(())
            }
        }
    }

    async fn process(&self, id: Uuid) -> Result<i64, IngestError> {
        let document = self
            .documents
            .get(id)
            .await
            .map_err(|e| IngestError::Store(e.to_string()))?
            .ok_or_else(|| IngestError::Store(format!("document {id} not found")))?;

        let bytes = tokio::fs::read(self.file_path(id))
            .await
            .map_err(|e| IngestError::Extraction(format!("stored file unreadable: {e}")))?;

        let text = extract(&bytes, &document.content_type)
            .map_err(|e| IngestError::Extraction(e.to_string()))?;

        let chunks = chunk_text(&text, &self.chunking);
        if chunks.is_empty() {
            return Err(IngestError::Extraction(
                "no indexable text after chunking".to_string(),
            ));
        }

        let embeddings = self.embed_all(&chunks).await?;

        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(ordinal, (text, embedding))| IndexedChunk {
                document_id: id,
                ordinal: ordinal as i64,
                text,
                embedding,
            })
            .collect();
        let count = indexed.len() as i64;

        if let Err(err) = self.index.upsert_chunks(&indexed).await {
            // Roll back whatever subset may have landed so a failed
            // document keeps zero indexed chunks.
            if let Err(cleanup) = self.index.delete_document(id).await {
                tracing::error!(
                    "Rollback after failed upsert for {} also failed: {}",
                    id,
                    cleanup
                );
            }
            return Err(IngestError::Index(err.to_string()));
        }

        Ok(count)
    }

    /// Embeds chunks in batches. A failed batch is retried item by item
    /// before giving up, so one poisoned input or flaky response does not
    /// discard the whole batch.
    async fn embed_all(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut embeddings = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.embed_batch_size) {
            match self.embedder.embed(batch).await {
                Ok(batch_embeddings) => embeddings.extend(batch_embeddings),
                Err(batch_err) if batch.len() > 1 => {
                    tracing::warn!(
                        "Batch embedding failed ({}); retrying {} items individually",
                        batch_err,
                        batch.len()
                    );
                    for item in batch {
                        let single = self
                            .embedder
                            .embed(std::slice::from_ref(item))
                            .await
                            .map_err(|e| IngestError::Embedding(e.to_string()))?;
                        embeddings.extend(single);
                    }
                }
                Err(err) => return Err(IngestError::Embedding(err.to_string())),
            }
        }

        Ok(embeddings)
    }

    /// Re-ingestion: clear the document's vectors, reset it to `pending`,
    /// and run again. Idempotent with respect to final index content.
    pub async fn reingest(self: &Arc<Self>, id: Uuid) -> Result<(), ApiError> {
        let document = self
            .documents
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("document {id} not found")))?;

        if !self.file_path(id).exists() {
            return Err(ApiError::NotFound(format!(
                "stored file for document {id} is missing"
            )));
        }

        self.index.delete_document(id).await?;
        self.documents.reset_pending(document.id).await?;
        self.spawn(id);
        Ok(())
    }

    /// Deletes a document: vectors first, then the stored file, then the
    /// record. A crash mid-way leaves a record pointing at an already
    /// empty index, which is detectable and safely re-deletable; the
    /// reverse order could leak orphaned vectors with no owning record.
    pub async fn delete(&self, id: Uuid) -> Result<bool, ApiError> {
        if self.documents.get(id).await?.is_none() {
            return Ok(false);
        }

        self.index.delete_document(id).await?;
        let _ = tokio::fs::remove_file(self.file_path(id)).await;
        self.documents.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::documents::DocumentStatus;
    use crate::errors::ProviderError;

    /// Deterministic embedder: 3 dimensions derived from the text.
    struct TestEmbedder {
        fail_batches: AtomicBool,
        fail_all: AtomicBool,
        calls: AtomicUsize,
    }

    impl TestEmbedder {
        fn new() -> Self {
            Self {
                fail_batches: AtomicBool::new(false),
                fail_all: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn embed_one(text: &str) -> Vec<f32> {
            let len = text.chars().count() as f32;
            let first = text.chars().next().map(|c| c as u32 as f32).unwrap_or(0.0);
            vec![len, first, 1.0]
        }
    }

    #[async_trait]
    impl EmbeddingProvider for TestEmbedder {
        fn model(&self) -> &str {
            "test-embedder"
        }

        fn dimension(&self) -> usize {
            3
        }

        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(ProviderError::Unavailable("embedder down".to_string()));
            }
            if self.fail_batches.load(Ordering::SeqCst) && inputs.len() > 1 {
                return Err(ProviderError::RateLimited("batch too big".to_string()));
            }
            Ok(inputs.iter().map(|t| Self::embed_one(t)).collect())
        }
    }

    /// In-memory index with a switchable upsert failure. On failure it
    /// keeps half the chunks to simulate a partial write the pipeline
    /// must roll back.
    struct TestIndex {
        chunks: Mutex<Vec<IndexedChunk>>,
        fail_upsert: AtomicBool,
    }

    impl TestIndex {
        fn new() -> Self {
            Self {
                chunks: Mutex::new(Vec::new()),
                fail_upsert: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for TestIndex {
        async fn upsert_chunks(&self, chunks: &[IndexedChunk]) -> Result<(), ApiError> {
            if self.fail_upsert.load(Ordering::SeqCst) {
                let mut stored = self.chunks.lock().unwrap();
                stored.extend(chunks.iter().take(chunks.len() / 2).cloned());
                return Err(ApiError::Internal("index write failed".to_string()));
            }
            self.chunks.lock().unwrap().extend(chunks.iter().cloned());
            Ok(())
        }

        async fn delete_document(&self, document_id: Uuid) -> Result<usize, ApiError> {
            let mut stored = self.chunks.lock().unwrap();
            let before = stored.len();
            stored.retain(|c| c.document_id != document_id);
            Ok(before - stored.len())
        }

        async fn query(
            &self,
            _embedding: &[f32],
            top_k: usize,
            document_ids: Option<&[Uuid]>,
        ) -> Result<Vec<crate::index::IndexHit>, ApiError> {
            let stored = self.chunks.lock().unwrap();
            Ok(stored
                .iter()
                .filter(|c| document_ids.is_none_or(|ids| ids.contains(&c.document_id)))
                .take(top_k)
                .map(|c| crate::index::IndexHit {
                    document_id: c.document_id,
                    ordinal: c.ordinal,
                    text: c.text.clone(),
                    score: 1.0,
                })
                .collect())
        }

        async fn count(&self, document_id: Option<Uuid>) -> Result<usize, ApiError> {
            let stored = self.chunks.lock().unwrap();
            Ok(stored
                .iter()
                .filter(|c| document_id.is_none_or(|id| c.document_id == id))
                .count())
        }
    }

    struct Fixture {
        pipeline: Arc<IngestionPipeline>,
        documents: DocumentStore,
        index: Arc<TestIndex>,
        embedder: Arc<TestEmbedder>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let documents = DocumentStore::new(&dir.path().join("docs.db")).await.unwrap();
        let index = Arc::new(TestIndex::new());
        let embedder = Arc::new(TestEmbedder::new());

        let pipeline = Arc::new(IngestionPipeline::new(
            documents.clone(),
            index.clone(),
            embedder.clone(),
            ChunkingConfig {
                chunk_size: 1000,
                chunk_overlap: 200,
                max_chunks_per_document: 1000,
            },
            &EmbeddingConfig {
                batch_size: 10,
                ..Default::default()
            },
            dir.path().join("uploads"),
        ));

        Fixture {
            pipeline,
            documents,
            index,
            embedder,
            _dir: dir,
        }
    }

    async fn upload(f: &Fixture, content: &[u8], content_type: &str) -> Uuid {
        let doc = f
            .documents
            .create("test.txt", content_type, content.len() as i64)
            .await
            .unwrap();
        f.pipeline.save_upload(doc.id, content).await.unwrap();
        doc.id
    }

    #[tokio::test]
    async fn successful_ingest_completes_with_chunk_count() {
        let f = fixture().await;
        let text = "a".repeat(3000);
        let id = upload(&f, text.as_bytes(), "text/plain").await;

        f.pipeline.run(id).await.unwrap();

        let doc = f.documents.get(id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.chunks_count, Some(4));
        assert_eq!(f.index.count(Some(id)).await.unwrap(), 4);

        // Ordinals are contiguous from zero.
        let stored = f.index.chunks.lock().unwrap();
        let mut ordinals: Vec<i64> = stored.iter().map(|c| c.ordinal).collect();
        ordinals.sort();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn extraction_failure_is_terminal_with_reason_and_no_vectors() {
        let f = fixture().await;
        let id = upload(&f, b"%PDF-1.4 binary", "application/pdf").await;

        f.pipeline.run(id).await.unwrap();

        let doc = f.documents.get(id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.chunks_count.is_none());
        assert!(doc.error.unwrap().contains("extraction failed"));
        assert_eq!(f.index.count(Some(id)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_failure_rolls_back_partial_vectors() {
        let f = fixture().await;
        let text = "a".repeat(3000);
        let id = upload(&f, text.as_bytes(), "text/plain").await;
        f.index.fail_upsert.store(true, Ordering::SeqCst);

        f.pipeline.run(id).await.unwrap();

        let doc = f.documents.get(id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.error.unwrap().contains("vector index failed"));
        // The simulated partial write must have been cleaned up.
        assert_eq!(f.index.count(Some(id)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn embedding_failure_fails_document_without_vectors() {
        let f = fixture().await;
        let id = upload(&f, b"some text to ingest", "text/plain").await;
        f.embedder.fail_all.store(true, Ordering::SeqCst);

        f.pipeline.run(id).await.unwrap();

        let doc = f.documents.get(id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.error.unwrap().contains("embedding failed"));
        assert_eq!(f.index.count(Some(id)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_batch_is_retried_item_by_item() {
        let f = fixture().await;
        let text = "b".repeat(3000);
        let id = upload(&f, text.as_bytes(), "text/plain").await;
        f.embedder.fail_batches.store(true, Ordering::SeqCst);

        f.pipeline.run(id).await.unwrap();

        let doc = f.documents.get(id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.chunks_count, Some(4));
        // One failed batch call plus four singles.
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn reingest_is_idempotent_on_index_content() {
        let f = fixture().await;
        let text = "a".repeat(3000);
        let id = upload(&f, text.as_bytes(), "text/plain").await;

        f.pipeline.run(id).await.unwrap();
        assert_eq!(f.index.count(Some(id)).await.unwrap(), 4);

        // Re-ingest: vectors cleared, reset to pending, run again.
        f.index.delete_document(id).await.unwrap();
        f.documents.reset_pending(id).await.unwrap();
        f.pipeline.run(id).await.unwrap();

        let doc = f.documents.get(id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.chunks_count, Some(4));
        assert_eq!(f.index.count(Some(id)).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn delete_removes_vectors_and_record() {
        let f = fixture().await;
        let text = "a".repeat(3000);
        let id = upload(&f, text.as_bytes(), "text/plain").await;
        f.pipeline.run(id).await.unwrap();

        assert!(f.pipeline.delete(id).await.unwrap());
        assert!(f.documents.get(id).await.unwrap().is_none());
        assert_eq!(f.index.count(Some(id)).await.unwrap(), 0);

        // Deleting again is a clean "not found".
        assert!(!f.pipeline.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn stored_upload_is_readable_until_deleted() {
        let f = fixture().await;
        let id = upload(&f, b"raw upload bytes", "text/plain").await;

        assert_eq!(f.pipeline.read_upload(id).await.unwrap(), b"raw upload bytes");

        f.pipeline.run(id).await.unwrap();
        assert_eq!(f.pipeline.read_upload(id).await.unwrap(), b"raw upload bytes");

        f.pipeline.delete(id).await.unwrap();
        assert!(matches!(
            f.pipeline.read_upload(id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn chunk_count_invariant_holds_after_every_run() {
        let f = fixture().await;

        let ok = upload(&f, "fine text".as_bytes(), "text/plain").await;
        let bad = upload(&f, b"\xff\xfe", "text/plain").await;

        f.pipeline.run(ok).await.unwrap();
        f.pipeline.run(bad).await.unwrap();

        for id in [ok, bad] {
            let doc = f.documents.get(id).await.unwrap().unwrap();
            assert_eq!(
                doc.chunks_count.is_some(),
                doc.status == DocumentStatus::Completed
            );
        }
    }
}
