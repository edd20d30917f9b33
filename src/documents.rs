//! Durable document store.
//!
//! The single source of truth for document lifecycle state. Only the
//! ingestion pipeline writes status transitions; everything else reads.
//! The transition methods keep the core invariant inside the store:
//! `chunks_count` is set if and only if a document is `completed`.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::ApiError;

/// Document lifecycle. `Completed` and `Failed` are terminal; a failed
/// document only moves again through an explicit re-ingestion request,
/// which resets it to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(ApiError::Internal(format!(
                "unknown document status in store: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub chunks_count: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn new(db_path: &Path) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK(status IN ('pending', 'processing', 'completed', 'failed')),
                error TEXT,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                completed_at TEXT,
                chunks_count INTEGER
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Creates the record with status `pending`. Ingestion is triggered
    /// separately; the caller returns as soon as this row exists.
    pub async fn create(
        &self,
        filename: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> Result<Document, ApiError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO documents (id, filename, content_type, size_bytes, status)
             VALUES (?1, ?2, ?3, ?4, 'pending')",
        )
        .bind(id.to_string())
        .bind(filename)
        .bind(content_type)
        .bind(size_bytes)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        self.get(id)
            .await?
            .ok_or_else(|| ApiError::Internal("document vanished after insert".to_string()))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Document>, ApiError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        row.as_ref().map(row_to_document).transpose()
    }

    pub async fn list(&self, skip: i64, limit: i64) -> Result<(Vec<Document>, i64), ApiError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        let rows = sqlx::query(
            "SELECT * FROM documents ORDER BY created_at DESC, id LIMIT ?1 OFFSET ?2",
        )
        .bind(limit.max(0))
        .bind(skip.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let documents = rows
            .iter()
            .map(row_to_document)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((documents, total))
    }

    /// Fetches several documents at once; missing ids are skipped.
    pub async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Document>, ApiError> {
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.get(*id).await? {
                documents.push(doc);
            }
        }
        Ok(documents)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() > 0)
    }

    /// `pending -> processing`. Committed before any extraction work starts
    /// so a concurrent reader never sees `processing` that is not durable.
    pub async fn mark_processing(&self, id: Uuid) -> Result<(), ApiError> {
        let result = sqlx::query(
            "UPDATE documents
             SET status = 'processing', error = NULL, completed_at = NULL, chunks_count = NULL
             WHERE id = ?1 AND status = 'pending'",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::Internal(format!(
                "document {id} is not pending; refusing processing transition"
            )));
        }
        Ok(())
    }

    /// `processing -> completed`. The only transition that writes
    /// `chunks_count`. Refused when the document is no longer processing,
    /// e.g. a concurrent reset raced the pipeline.
    pub async fn mark_completed(&self, id: Uuid, chunks_count: i64) -> Result<(), ApiError> {
        let result = sqlx::query(
            "UPDATE documents
             SET status = 'completed', error = NULL, completed_at = ?2, chunks_count = ?3
             WHERE id = ?1 AND status = 'processing'",
        )
        .bind(id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(chunks_count)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::Internal(format!(
                "document {id} is not processing; refusing completed transition"
            )));
        }
        Ok(())
    }

    /// Terminal failure with a stored reason. Clears `chunks_count` so the
    /// completed-iff-counted invariant holds whatever happened before.
    pub async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), ApiError> {
        sqlx::query(
            "UPDATE documents
             SET status = 'failed', error = ?2, completed_at = ?3, chunks_count = NULL
             WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    /// Explicit re-ingestion entry point: back to `pending` from any state.
    pub async fn reset_pending(&self, id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            "UPDATE documents
             SET status = 'pending', error = NULL, completed_at = NULL, chunks_count = NULL
             WHERE id = ?1",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    /// Number of completed documents, optionally restricted to a scope.
    /// Used by the chat orchestrator to short-circuit on an empty corpus.
    pub async fn count_completed(&self, scope: Option<&[Uuid]>) -> Result<i64, ApiError> {
        match scope {
            None => sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE status = 'completed'")
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal),
            Some(ids) => {
                let mut count = 0;
                for id in ids {
                    if let Some(doc) = self.get(*id).await? {
                        if doc.status == DocumentStatus::Completed {
                            count += 1;
                        }
                    }
                }
                Ok(count)
            }
        }
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document, ApiError> {
    let raw_id: String = row.get("id");
    let raw_status: String = row.get("status");

    Ok(Document {
        id: Uuid::parse_str(&raw_id).map_err(ApiError::internal)?,
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        size_bytes: row.get("size_bytes"),
        status: DocumentStatus::parse(&raw_status)?,
        error: row.get("error"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
        chunks_count: row.get("chunks_count"),
    })
}
