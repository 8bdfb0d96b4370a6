//! Explicit queues between pipeline stages.
//!
//! Stage handoff goes through bounded mpsc channels instead of direct
//! calls: the sender never waits for the stage to run, and the worker
//! loop owns retry and dead-lettering. Delivery is at-least-once from
//! the stages' point of view; every stage write is an idempotent upsert
//! so duplicates converge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::errors::PipelineError;
use crate::storage::documents::{Category, DocumentStore};

/// Object-creation trigger for the classifier.
#[derive(Debug, Clone)]
pub struct ClassifyJob {
    pub source_key: String,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct ExtractJob {
    pub document_id: String,
    pub source_key: String,
    pub file_name: String,
    pub category: Category,
}

#[derive(Debug, Clone)]
pub struct RouteJob {
    pub document_id: String,
    pub source_key: String,
    pub file_name: String,
    pub category: Category,
    pub extracted_fields: Value,
}

#[derive(Debug, Clone)]
pub struct EmbedJob {
    pub document_id: String,
    pub source_key: String,
}

#[derive(Clone)]
pub struct StageBus {
    classify_tx: mpsc::Sender<ClassifyJob>,
    extract_tx: mpsc::Sender<ExtractJob>,
    route_tx: mpsc::Sender<RouteJob>,
    embed_tx: mpsc::Sender<EmbedJob>,
}

pub struct StageReceivers {
    pub classify_rx: mpsc::Receiver<ClassifyJob>,
    pub extract_rx: mpsc::Receiver<ExtractJob>,
    pub route_rx: mpsc::Receiver<RouteJob>,
    pub embed_rx: mpsc::Receiver<EmbedJob>,
}

impl StageBus {
    pub fn new(queue_depth: usize) -> (Self, StageReceivers) {
        let depth = queue_depth.max(1);
        let (classify_tx, classify_rx) = mpsc::channel(depth);
        let (extract_tx, extract_rx) = mpsc::channel(depth);
        let (route_tx, route_rx) = mpsc::channel(depth);
        let (embed_tx, embed_rx) = mpsc::channel(depth);

        (
            StageBus {
                classify_tx,
                extract_tx,
                route_tx,
                embed_tx,
            },
            StageReceivers {
                classify_rx,
                extract_rx,
                route_rx,
                embed_rx,
            },
        )
    }

    pub async fn send_classify(&self, job: ClassifyJob) -> Result<(), PipelineError> {
        self.classify_tx
            .send(job)
            .await
            .map_err(|_| PipelineError::Storage("classify queue closed".to_string()))
    }

    pub async fn send_extract(&self, job: ExtractJob) -> Result<(), PipelineError> {
        self.extract_tx
            .send(job)
            .await
            .map_err(|_| PipelineError::Storage("extract queue closed".to_string()))
    }

    pub async fn send_route(&self, job: RouteJob) -> Result<(), PipelineError> {
        self.route_tx
            .send(job)
            .await
            .map_err(|_| PipelineError::Storage("route queue closed".to_string()))
    }

    pub async fn send_embed(&self, job: EmbedJob) -> Result<(), PipelineError> {
        self.embed_tx
            .send(job)
            .await
            .map_err(|_| PipelineError::Storage("embed queue closed".to_string()))
    }
}

/// One unit of pipeline processing, driven by a worker loop.
#[async_trait]
pub trait Stage<J>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reason recorded on the document when this stage fails terminally.
    fn failure_reason(&self) -> &'static str;

    fn job_document_id(&self, job: &J) -> String;

    async fn process(&self, job: &J) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// Consume a stage queue until it closes. Retryable errors get bounded
/// attempts with linear backoff; exhaustion (or a terminal error)
/// records a dead letter and marks the document failed. State conflicts
/// are logic bugs: surfaced loudly, never retried, and the document's
/// state is left alone.
pub async fn run_worker<J, S>(
    stage: Arc<S>,
    mut rx: mpsc::Receiver<J>,
    documents: Arc<DocumentStore>,
    retry: RetryPolicy,
) where
    J: Send + 'static,
    S: Stage<J> + ?Sized + 'static,
{
    while let Some(job) = rx.recv().await {
        let mut attempt: u32 = 1;
        loop {
            match stage.process(&job).await {
                Ok(()) => break,
                Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                    tracing::warn!(
                        stage = stage.name(),
                        attempt,
                        "retrying after error: {err}"
                    );
                    tokio::time::sleep(retry.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    let document_id = stage.job_document_id(&job);
                    let conflict = matches!(err, PipelineError::StateConflict { .. });
                    if conflict {
                        tracing::error!(
                            stage = stage.name(),
                            document_id = %document_id,
                            "state conflict (trigger ordering violation): {err}"
                        );
                    } else {
                        tracing::error!(
                            stage = stage.name(),
                            document_id = %document_id,
                            attempt,
                            "giving up: {err}"
                        );
                    }

                    if let Err(dl_err) = documents
                        .record_dead_letter(&document_id, stage.name(), &err.to_string(), attempt)
                        .await
                    {
                        tracing::error!("failed to record dead letter: {dl_err}");
                    }
                    if !conflict {
                        if let Err(mark_err) = documents
                            .mark_failed(&document_id, stage.failure_reason())
                            .await
                        {
                            tracing::error!("failed to mark document failed: {mark_err}");
                        }
                    }
                    break;
                }
            }
        }
    }
    tracing::debug!(stage = stage.name(), "stage queue closed, worker exiting");
}
