//! First pipeline stage: assign a document id and a category.
//!
//! Triggered by object creation in the incoming area. The document id is
//! a uuid v5 of the object key, so redelivered triggers for the same
//! object converge on one row instead of minting duplicates.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::bus::{ClassifyJob, ExtractJob, Stage, StageBus};
use crate::core::errors::PipelineError;
use crate::model::ModelProvider;
use crate::storage::documents::{Category, DocumentState, DocumentStore};
use crate::storage::object_store::ObjectStore;

/// Deterministic document id for an incoming object key.
pub fn document_id_for(source_key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, source_key.as_bytes()).to_string()
}

pub struct Classifier {
    objects: Arc<ObjectStore>,
    documents: Arc<DocumentStore>,
    model: Arc<dyn ModelProvider>,
    bus: StageBus,
    max_document_chars: usize,
}

impl Classifier {
    pub fn new(
        objects: Arc<ObjectStore>,
        documents: Arc<DocumentStore>,
        model: Arc<dyn ModelProvider>,
        bus: StageBus,
        max_document_chars: usize,
    ) -> Self {
        Self {
            objects,
            documents,
            model,
            bus,
            max_document_chars,
        }
    }

    fn truncate_for_model<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.max_document_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }
}

#[async_trait]
impl Stage<ClassifyJob> for Classifier {
    fn name(&self) -> &'static str {
        "classifier"
    }

    fn failure_reason(&self) -> &'static str {
        "classification_error"
    }

    fn job_document_id(&self, job: &ClassifyJob) -> String {
        document_id_for(&job.source_key)
    }

    async fn process(&self, job: &ClassifyJob) -> Result<(), PipelineError> {
        let document_id = document_id_for(&job.source_key);
        self.documents
            .ensure_document(&document_id, &job.source_key, &job.file_name)
            .await?;

        let doc = self
            .documents
            .get(&document_id)
            .await?
            .ok_or_else(|| PipelineError::state_conflict(&document_id, "document row missing"))?;

        if doc.state == DocumentState::Failed {
            return Ok(());
        }

        // Redelivered trigger for an already-classified document: skip
        // the model call and re-enqueue the next stage with the stored
        // category, so the final state matches a single delivery.
        let category = if let (Some(category), true) = (
            doc.category,
            doc.state >= DocumentState::Classified,
        ) {
            category
        } else {
            self.documents
                .advance_state(&document_id, DocumentState::Classifying)
                .await?;

            let text = self.objects.read_incoming(&job.source_key).await?;
            let label = self
                .model
                .classify(self.truncate_for_model(&text), &Category::LABELS)
                .await?;
            let category = Category::from_label(&label);

            self.documents.set_category(&document_id, category).await?;
            self.documents
                .advance_state(&document_id, DocumentState::Classified)
                .await?;

            tracing::info!(
                document_id = %document_id,
                category = category.as_str(),
                "document classified"
            );
            category
        };

        self.bus
            .send_extract(ExtractJob {
                document_id,
                source_key: job.source_key.clone(),
                file_name: job.file_name.clone(),
                category,
            })
            .await
    }
}
