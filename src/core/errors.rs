use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Pipeline-side error taxonomy.
///
/// Every stage maps its failures onto one of these classes; only
/// `Storage` errors are retried by the stage workers, everything else is
/// terminal for the document.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input error: {0}")]
    Input(String),
    #[error("capability error in {stage}: {message}")]
    Capability { stage: &'static str, message: String },
    #[error("state conflict for document {document_id}: {message}")]
    StateConflict {
        document_id: String,
        message: String,
    },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("config error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        PipelineError::Storage(err.to_string())
    }

    pub fn capability<E: std::fmt::Display>(stage: &'static str, err: E) -> Self {
        PipelineError::Capability {
            stage,
            message: err.to_string(),
        }
    }

    pub fn state_conflict<S: Into<String>, M: Into<String>>(document_id: S, message: M) -> Self {
        PipelineError::StateConflict {
            document_id: document_id.into(),
            message: message.into(),
        }
    }

    /// Whether a stage worker should retry the job after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Storage(_))
    }
}

/// HTTP-facing errors. Chat failures keep retrieval, generation and
/// generation-timeout distinguishable so callers can retry selectively.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("generation timed out")]
    GenerationTimeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, kind, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::Retrieval(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "retrieval", msg.clone())
            }
            ApiError::Generation(msg) => (StatusCode::BAD_GATEWAY, "generation", msg.clone()),
            ApiError::GenerationTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "generation_timeout",
                "generation timed out".to_string(),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg.clone()),
        };

        let body = Json(json!({ "error": message, "kind": kind }));
        (status, body).into_response()
    }
}
