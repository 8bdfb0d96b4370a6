//! The event-driven document pipeline:
//! upload → classify → extract → {route, embed}.
//!
//! Stages are stateless units wired together by the `StageBus` queues;
//! `spawn_workers` starts one consumer task per stage.

pub mod bus;
pub mod chunker;
pub mod classifier;
pub mod embedder;
pub mod extractor;
pub mod notify;
pub mod router;

use std::sync::Arc;
use std::time::Duration;

use bus::{RetryPolicy, StageReceivers};
use chunker::ChunkerConfig;
use classifier::Classifier;
use embedder::EmbeddingGenerator;
use extractor::Extractor;
use router::DocumentRouter;

use crate::state::AppState;

pub fn spawn_workers(state: Arc<AppState>, receivers: StageReceivers) {
    let retry = RetryPolicy {
        max_attempts: state.settings.pipeline.max_attempts.max(1),
        backoff: Duration::from_millis(state.settings.pipeline.retry_backoff_ms),
    };

    let classifier = Arc::new(Classifier::new(
        state.objects.clone(),
        state.documents.clone(),
        state.model.clone(),
        state.bus.clone(),
        state.settings.pipeline.max_document_chars,
    ));
    let extractor = Arc::new(Extractor::new(
        state.objects.clone(),
        state.documents.clone(),
        state.model.clone(),
        state.bus.clone(),
    ));
    let router = Arc::new(DocumentRouter::new(
        state.objects.clone(),
        state.documents.clone(),
        state.notifier.clone(),
    ));
    let embedder = Arc::new(EmbeddingGenerator::new(
        state.objects.clone(),
        state.documents.clone(),
        state.embeddings.clone(),
        state.model.clone(),
        ChunkerConfig {
            size_words: state.settings.pipeline.chunk_size_words,
            overlap_words: state.settings.pipeline.chunk_overlap_words,
        },
        state.settings.model.embedding_model.clone(),
        state.settings.model.embedding_dim,
    ));

    tokio::spawn(bus::run_worker(
        classifier,
        receivers.classify_rx,
        state.documents.clone(),
        retry,
    ));
    tokio::spawn(bus::run_worker(
        extractor,
        receivers.extract_rx,
        state.documents.clone(),
        retry,
    ));
    tokio::spawn(bus::run_worker(
        router,
        receivers.route_rx,
        state.documents.clone(),
        retry,
    ));
    tokio::spawn(bus::run_worker(
        embedder,
        receivers.embed_rx,
        state.documents.clone(),
        retry,
    ));
}
