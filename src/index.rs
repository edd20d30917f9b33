//! Vector index contract and the default SQLite-backed implementation.
//!
//! The pipeline and retrieval engine only see the narrow `VectorIndex`
//! trait: upsert a document's chunks, delete by document, top-k query by
//! vector. The bundled backend stores embeddings as little-endian f32
//! blobs in SQLite and scores with brute-force cosine similarity, which is
//! plenty for the corpus sizes a single instance serves.

use std::cmp::Ordering;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::ApiError;

/// A chunk ready for indexing: text plus its embedding, tagged with the
/// owning document and its ordinal within that document.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub document_id: Uuid,
    pub ordinal: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A query hit. Ephemeral, never stored.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub document_id: Uuid,
    pub ordinal: i64,
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts all chunks for one document atomically: after a failure the
    /// index holds none of them. Callers re-indexing a document delete its
    /// old vectors first.
    async fn upsert_chunks(&self, chunks: &[IndexedChunk]) -> Result<(), ApiError>;

    /// Removes every vector belonging to a document. Returns the number
    /// removed; deleting an absent document is not an error.
    async fn delete_document(&self, document_id: Uuid) -> Result<usize, ApiError>;

    /// Top-k nearest chunks by cosine similarity, optionally restricted to
    /// a set of document ids. Ordered by descending score, ties broken by
    /// ascending (document id, ordinal).
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<IndexHit>, ApiError>;

    /// Total vectors stored, optionally for one document.
    async fn count(&self, document_id: Option<Uuid>) -> Result<usize, ApiError>;
}

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    /// Opens (or creates) the index database and pins it to
    /// `embedding_model`. Opening an index written with a different model
    /// fails: mixing vector spaces would silently corrupt every query.
    pub async fn open(db_path: &Path, embedding_model: &str) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let index = Self { pool };
        index.init_schema().await?;
        index.pin_model(embedding_model).await?;
        Ok(index)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                document_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (document_id, ordinal)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn pin_model(&self, embedding_model: &str) -> Result<(), ApiError> {
        let pinned: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'embedding_model'")
                .fetch_optional(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        match pinned {
            Some(existing) if existing != embedding_model => Err(ApiError::Internal(format!(
                "vector index was built with embedding model '{existing}' \
                 but '{embedding_model}' is configured; re-embed or point at a fresh index"
            ))),
            Some(_) => Ok(()),
            None => {
                sqlx::query("INSERT INTO index_meta (key, value) VALUES ('embedding_model', ?1)")
                    .bind(embedding_model)
                    .execute(&self.pool)
                    .await
                    .map_err(ApiError::internal)?;
                Ok(())
            }
        }
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert_chunks(&self, chunks: &[IndexedChunk]) -> Result<(), ApiError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for chunk in chunks {
            let blob = Self::serialize_embedding(&chunk.embedding);
            sqlx::query(
                "INSERT OR REPLACE INTO chunks (document_id, ordinal, text, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(chunk.document_id.to_string())
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<IndexHit>, ApiError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if let Some(ids) = document_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
        }

        let rows = sqlx::query("SELECT document_id, ordinal, text, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        let mut hits: Vec<IndexHit> = rows
            .iter()
            .filter_map(|row| {
                let raw_id: String = row.get("document_id");
                let document_id = Uuid::parse_str(&raw_id).ok()?;

                if let Some(ids) = document_ids {
                    if !ids.contains(&document_id) {
                        return None;
                    }
                }

                let blob: Vec<u8> = row.get("embedding");
                let stored = Self::deserialize_embedding(&blob);
                Some(IndexHit {
                    document_id,
                    ordinal: row.get("ordinal"),
                    text: row.get("text"),
                    score: Self::cosine_similarity(embedding, &stored),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then_with(|| a.ordinal.cmp(&b.ordinal))
        });
        hits.truncate(top_k);

        Ok(hits)
    }

    async fn count(&self, document_id: Option<Uuid>) -> Result<usize, ApiError> {
        let count: i64 = if let Some(id) = document_id {
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?1")
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?
        };

        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_index() -> (SqliteVectorIndex, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteVectorIndex::open(&dir.path().join("vectors.db"), "test-model")
            .await
            .unwrap();
        (index, dir)
    }

    fn chunk(document_id: Uuid, ordinal: i64, text: &str, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            document_id,
            ordinal,
            text: text.to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn upsert_query_roundtrip() {
        let (index, _dir) = test_index().await;
        let doc = Uuid::new_v4();

        index
            .upsert_chunks(&[
                chunk(doc, 0, "about cats", vec![1.0, 0.0, 0.0]),
                chunk(doc, 1, "about dogs", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "about cats");
        assert!(hits[0].score > 0.99);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn ties_break_by_document_then_ordinal() {
        let (index, _dir) = test_index().await;
        let doc_a = Uuid::from_u128(1);
        let doc_b = Uuid::from_u128(2);

        // Same embedding everywhere, so every score ties.
        let e = vec![1.0, 0.0];
        index
            .upsert_chunks(&[
                chunk(doc_b, 0, "b0", e.clone()),
                chunk(doc_a, 1, "a1", e.clone()),
                chunk(doc_a, 0, "a0", e.clone()),
            ])
            .await
            .unwrap();

        let hits = index.query(&e, 10, None).await.unwrap();
        let order: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(order, vec!["a0", "a1", "b0"]);
    }

    #[tokio::test]
    async fn delete_document_removes_all_vectors() {
        let (index, _dir) = test_index().await;
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();

        index
            .upsert_chunks(&[
                chunk(keep, 0, "keep", vec![1.0]),
                chunk(drop, 0, "drop a", vec![1.0]),
                chunk(drop, 1, "drop b", vec![1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(index.delete_document(drop).await.unwrap(), 2);
        assert_eq!(index.count(None).await.unwrap(), 1);
        assert_eq!(index.count(Some(drop)).await.unwrap(), 0);

        let hits = index.query(&[1.0], 10, Some(&[drop])).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn empty_filter_set_returns_empty() {
        let (index, _dir) = test_index().await;
        index
            .upsert_chunks(&[chunk(Uuid::new_v4(), 0, "x", vec![1.0])])
            .await
            .unwrap();

        let hits = index.query(&[1.0], 10, Some(&[])).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn top_k_clamps_to_index_size() {
        let (index, _dir) = test_index().await;
        let doc = Uuid::new_v4();
        index
            .upsert_chunks(&[chunk(doc, 0, "only", vec![1.0])])
            .await
            .unwrap();

        let hits = index.query(&[1.0], 50, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn rejects_mismatched_embedding_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        SqliteVectorIndex::open(&path, "model-a").await.unwrap();
        let err = SqliteVectorIndex::open(&path, "model-b").await;
        assert!(err.is_err());
    }
}
