//! Document management endpoints.
//!
//! Upload validates and records the document, then returns immediately;
//! extraction and indexing happen in a background task. Clients poll the
//! document's status to see it move through the lifecycle.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::documents::Document;
use crate::errors::ApiError;
use crate::extract::is_supported_media_type;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<Document>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
        .ok_or_else(|| ApiError::BadRequest("multipart body has no file field".to_string()))?;

    let filename = field
        .file_name()
        .map(str::to_string)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("uploaded file has no filename".to_string()))?;

    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| media_type_from_filename(&filename));

    if !is_supported_media_type(&content_type) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "media type '{content_type}' is not supported"
        )));
    }

    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed reading upload: {e}")))?;

    if bytes.is_empty() {
        return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
    }
    let max = state.config.server.max_upload_bytes;
    if bytes.len() > max {
        return Err(ApiError::PayloadTooLarge(format!(
            "file is {} bytes; the limit is {} bytes",
            bytes.len(),
            max
        )));
    }

    let document = state
        .documents
        .create(&filename, &content_type, bytes.len() as i64)
        .await?;
    state.pipeline.save_upload(document.id, &bytes).await?;
    state.pipeline.spawn(document.id);

    tracing::info!(
        "Accepted upload '{}' ({} bytes) as document {}",
        filename,
        bytes.len(),
        document.id
    );

    Ok((StatusCode::ACCEPTED, Json(document)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentListResponse>, ApiError> {
    let limit = params.limit.clamp(1, 200);
    let skip = params.skip.max(0);
    let (documents, total) = state.documents.list(skip, limit).await?;

    Ok(Json(DocumentListResponse {
        documents,
        total,
        skip,
        limit,
    }))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Document>, ApiError> {
    let document = state
        .documents
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document {id} not found")))?;
    Ok(Json(document))
}

/// Serves the raw upload back with its original media type and filename.
pub async fn content(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let document = state
        .documents
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document {id} not found")))?;
    let bytes = state.pipeline.read_upload(id).await?;

    Ok((
        [
            (header::CONTENT_TYPE, document.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document.filename),
            ),
        ],
        bytes,
    ))
}

pub async fn reprocess(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.pipeline.reingest(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "status": "pending" })),
    ))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if !state.pipeline.delete(id).await? {
        return Err(ApiError::NotFound(format!("document {id} not found")));
    }
    Ok(Json(json!({ "id": id, "deleted": true })))
}

fn media_type_from_filename(filename: &str) -> String {
    let ext = filename.rsplit('.').next().unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        _ => "text/plain",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_fallback_media_types() {
        assert_eq!(media_type_from_filename("notes.md"), "text/markdown");
        assert_eq!(media_type_from_filename("page.HTML"), "text/html");
        assert_eq!(media_type_from_filename("plain.txt"), "text/plain");
        assert_eq!(media_type_from_filename("noext"), "text/plain");
    }
}
