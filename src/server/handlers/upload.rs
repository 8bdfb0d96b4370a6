use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::pipeline::bus::ClassifyJob;
use crate::pipeline::classifier::document_id_for;
use crate::state::AppState;
use crate::storage::object_store::{sanitize_file_name, ObjectStore};

/// Accept raw file bytes with an `x-file-name` header, write the object
/// into incoming storage and trigger classification. The response
/// carries the generated key; pipeline progress is asynchronous and
/// observable via the documents endpoints.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let raw_name = headers
        .get("x-file-name")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing x-file-name header".to_string()))?;

    let file_name =
        sanitize_file_name(raw_name).map_err(|err| ApiError::BadRequest(err.to_string()))?;

    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload body".to_string()));
    }
    if body.len() > state.settings.pipeline.max_upload_bytes {
        return Err(ApiError::BadRequest(format!(
            "upload exceeds {} bytes",
            state.settings.pipeline.max_upload_bytes
        )));
    }

    let source_key = ObjectStore::incoming_key(&file_name);
    state
        .objects
        .write_incoming(&source_key, &body)
        .await
        .map_err(ApiError::internal)?;

    // The storage-creation trigger: enqueue, don't wait.
    state
        .bus
        .send_classify(ClassifyJob {
            source_key: source_key.clone(),
            file_name,
        })
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "source_key": source_key,
        "document_id": document_id_for(&source_key),
    })))
}
