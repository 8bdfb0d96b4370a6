//! The RAG chat query path: embed the query, retrieve the nearest
//! chunks, generate an answer under a hard timeout.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::errors::{ApiError, PipelineError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub response: String,
}

/// Start a new conversation; the generated id comes back in the
/// response so the caller can continue the thread.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    answer(&state, None, &body.query).await.map(Json)
}

/// Continue an existing conversation. Turn history is owned by the
/// client; the id is echoed back unchanged.
pub async fn chat_continue(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    if conversation_id.trim().is_empty() {
        return Err(ApiError::BadRequest("empty conversation id".to_string()));
    }
    answer(&state, Some(conversation_id), &body.query)
        .await
        .map(Json)
}

pub async fn answer(
    state: &AppState,
    conversation_id: Option<String>,
    query: &str,
) -> Result<ChatResponse, ApiError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("empty query".to_string()));
    }

    let conversation_id =
        conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    // The query must be embedded by the same model that embedded the
    // chunks; a mismatch is a deployment bug, not a retryable fault.
    state
        .embeddings
        .ensure_model(
            &state.settings.model.embedding_model,
            state.settings.model.embedding_dim,
        )
        .await
        .map_err(ApiError::internal)?;

    let mut query_vectors = state
        .model
        .embed(&[query.to_string()])
        .await
        .map_err(|err| ApiError::Retrieval(err.to_string()))?;
    let query_vector = query_vectors
        .pop()
        .ok_or_else(|| ApiError::Retrieval("no embedding returned for query".to_string()))?;
    if query_vector.len() != state.settings.model.embedding_dim {
        return Err(ApiError::internal(PipelineError::Config(format!(
            "query embedding dimension {} does not match configured {}",
            query_vector.len(),
            state.settings.model.embedding_dim
        ))));
    }

    let results = state
        .embeddings
        .search(&query_vector, state.settings.chat.top_k)
        .await
        .map_err(|err| ApiError::Retrieval(err.to_string()))?;

    let context = results
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "You are a helpful assistant. Please answer the following question based \
         on the provided context.\n\nContext:\n{context}\n\nQuestion: {query}"
    );

    let timeout = Duration::from_secs(state.settings.model.generate_timeout_secs.max(1));
    let response = match tokio::time::timeout(timeout, state.model.generate(&prompt)).await {
        Err(_) => return Err(ApiError::GenerationTimeout),
        Ok(Err(err)) => return Err(ApiError::Generation(err.to_string())),
        Ok(Ok(answer)) => answer,
    };

    Ok(ChatResponse {
        conversation_id,
        response,
    })
}
