//! Retrieval engine: query embedding, top-k vector search, and result
//! shaping.
//!
//! Stateless and safe to run concurrently with ingestion: the pipeline's
//! all-or-nothing upsert discipline guarantees a document's vectors are
//! either entirely absent or entirely present, so this engine needs no
//! knowledge of ingestion state.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::documents::DocumentStore;
use crate::embedding::EmbeddingProvider;
use crate::errors::ApiError;
use crate::index::VectorIndex;

/// Characters kept when rendering a chunk as a citation excerpt.
const EXCERPT_MAX_CHARS: usize = 500;

/// Query-scoped projection of an indexed chunk. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub document_id: Uuid,
    pub document_filename: String,
    pub text: String,
    pub score: f32,
    pub chunk_index: i64,
}

pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    documents: DocumentStore,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        documents: DocumentStore,
    ) -> Self {
        Self {
            embedder,
            index,
            documents,
        }
    }

    /// Embeds the query with the pinned model and returns up to `top_k`
    /// results in descending score order (ties: ascending document id,
    /// then ordinal — the index upholds this). An empty index or an empty
    /// filter set yields an empty list, not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<SearchResult>, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ApiError::BadRequest("query cannot be empty".to_string()));
        }
        if let Some(ids) = document_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
        }

        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .map_err(|e| ApiError::Internal(format!("query embedding failed: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Internal("embedder returned no vector".to_string()))?;

        let hits = self
            .index
            .query(&query_embedding, top_k, document_ids)
            .await?;

        if hits.is_empty() {
            return Ok(Vec::new());
        }

        // Join filenames for citation rendering.
        let mut unique_ids: Vec<Uuid> = hits.iter().map(|h| h.document_id).collect();
        unique_ids.sort();
        unique_ids.dedup();
        let docs = self.documents.get_many(&unique_ids).await?;

        let results = hits
            .into_iter()
            .map(|hit| {
                let filename = docs
                    .iter()
                    .find(|d| d.id == hit.document_id)
                    .map(|d| d.filename.clone())
                    .unwrap_or_default();
                SearchResult {
                    id: format!("{}:{}", hit.document_id, hit.ordinal),
                    document_id: hit.document_id,
                    document_filename: filename,
                    text: hit.text,
                    score: hit.score,
                    chunk_index: hit.ordinal,
                }
            })
            .collect();

        Ok(results)
    }
}

/// Trims a chunk to citation length, preferring to cut at a sentence end.
pub fn excerpt(text: &str) -> String {
    let cleaned: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.chars().count() <= EXCERPT_MAX_CHARS {
        return cleaned;
    }

    let head: String = cleaned.chars().take(EXCERPT_MAX_CHARS).collect();
    match head.rfind(". ") {
        Some(pos) if pos > EXCERPT_MAX_CHARS / 2 => format!("{}...", &head[..pos + 1]),
        _ => format!("{head}..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(excerpt("a short  chunk"), "a short chunk");
    }

    #[test]
    fn long_text_is_cut_at_sentence() {
        let text = format!("{} End of sentence. {}", "x".repeat(300), "y".repeat(400));
        let cut = excerpt(&text);
        assert!(cut.chars().count() < text.chars().count());
        assert!(cut.ends_with("...") || cut.ends_with('.'));
    }
}
