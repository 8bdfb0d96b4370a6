use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{chat, documents, health, upload};
use crate::state::AppState;

/// Build the application router: upload intake, the chat query path and
/// the operational document endpoints, behind CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.settings.pipeline.max_upload_bytes;
    Router::new()
        .route("/health", get(health::health))
        .route("/api/upload", post(upload::upload))
        .route("/api/chat", post(chat::chat))
        .route("/api/chat/:conversation_id", post(chat::chat_continue))
        .route("/api/documents", get(documents::list_documents))
        .route("/api/documents/:document_id", get(documents::get_document))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer() -> CorsLayer {
    let origins = default_local_origins()
        .into_iter()
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-file-name"),
        ])
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}
