//! Operational visibility into pipeline state: stage failures never
//! reach the uploader synchronously, so operators watch documents here.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(50);

    let documents = state
        .documents
        .list(limit)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "documents": documents })))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = state
        .documents
        .get(&document_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::NotFound(format!("document {document_id}")))?;

    let chunk_count = state
        .embeddings
        .chunk_count(&document_id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "document": document,
        "chunk_count": chunk_count,
    })))
}
