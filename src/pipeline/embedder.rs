//! Fourth stage: chunk the document, embed every chunk and replace the
//! stored chunk set atomically.
//!
//! Any model failure aborts before the store is touched, so a partial
//! chunk set is never persisted.

use std::sync::Arc;

use async_trait::async_trait;

use super::bus::{EmbedJob, Stage};
use super::chunker::{split_into_chunks, ChunkerConfig};
use crate::core::errors::PipelineError;
use crate::model::ModelProvider;
use crate::storage::documents::{DocumentState, DocumentStore};
use crate::storage::embeddings::EmbeddingStore;
use crate::storage::object_store::ObjectStore;

pub struct EmbeddingGenerator {
    objects: Arc<ObjectStore>,
    documents: Arc<DocumentStore>,
    embeddings: Arc<EmbeddingStore>,
    model: Arc<dyn ModelProvider>,
    chunker: ChunkerConfig,
    embedding_model: String,
    embedding_dim: usize,
}

impl EmbeddingGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        objects: Arc<ObjectStore>,
        documents: Arc<DocumentStore>,
        embeddings: Arc<EmbeddingStore>,
        model: Arc<dyn ModelProvider>,
        chunker: ChunkerConfig,
        embedding_model: String,
        embedding_dim: usize,
    ) -> Self {
        Self {
            objects,
            documents,
            embeddings,
            model,
            chunker,
            embedding_model,
            embedding_dim,
        }
    }
}

#[async_trait]
impl Stage<EmbedJob> for EmbeddingGenerator {
    fn name(&self) -> &'static str {
        "embedder"
    }

    fn failure_reason(&self) -> &'static str {
        "embedding_error"
    }

    fn job_document_id(&self, job: &EmbedJob) -> String {
        job.document_id.clone()
    }

    async fn process(&self, job: &EmbedJob) -> Result<(), PipelineError> {
        let doc = self
            .documents
            .get(&job.document_id)
            .await?
            .ok_or_else(|| {
                PipelineError::state_conflict(&job.document_id, "invoked for unknown document")
            })?;

        if doc.state == DocumentState::Failed {
            return Ok(());
        }
        if doc.state < DocumentState::Extracted {
            return Err(PipelineError::state_conflict(
                &job.document_id,
                format!(
                    "embedder invoked before extraction (state {})",
                    doc.state.as_str()
                ),
            ));
        }

        self.embeddings
            .ensure_model(&self.embedding_model, self.embedding_dim)
            .await?;
        self.documents
            .advance_state(&job.document_id, DocumentState::Embedding)
            .await?;

        let text = self.objects.read_incoming(&job.source_key).await?;
        let chunks = split_into_chunks(&text, self.chunker);

        let rows: Vec<(String, Vec<f32>)> = if chunks.is_empty() {
            Vec::new()
        } else {
            let vectors = self.model.embed(&chunks).await?;
            for vector in &vectors {
                if vector.len() != self.embedding_dim {
                    return Err(PipelineError::Config(format!(
                        "embedding dimension mismatch: model returned {}, configured {}",
                        vector.len(),
                        self.embedding_dim
                    )));
                }
            }
            chunks.into_iter().zip(vectors).collect()
        };

        self.embeddings
            .replace_document(&job.document_id, &rows)
            .await?;
        self.documents
            .advance_state(&job.document_id, DocumentState::Embedded)
            .await?;

        tracing::info!(
            document_id = %job.document_id,
            chunks = rows.len(),
            "document embedded"
        );
        Ok(())
    }
}
