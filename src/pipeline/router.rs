//! Third stage: place the document in organized storage, commit the
//! final metadata and notify downstream consumers.
//!
//! The organized key is a pure function of category, document id and
//! file name, and the object is copied rather than moved, so a retried
//! run lands on the same destination with no side effects to undo.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::bus::{RouteJob, Stage};
use super::notify::{Notification, Notifier};
use crate::core::errors::PipelineError;
use crate::storage::documents::{Category, DocumentState, DocumentStore};
use crate::storage::object_store::ObjectStore;

pub fn organized_key(category: Category, document_id: &str, file_name: &str) -> String {
    format!("{}/{document_id}-{file_name}", category.as_str())
}

pub struct DocumentRouter {
    objects: Arc<ObjectStore>,
    documents: Arc<DocumentStore>,
    notifier: Arc<dyn Notifier>,
}

impl DocumentRouter {
    pub fn new(
        objects: Arc<ObjectStore>,
        documents: Arc<DocumentStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            objects,
            documents,
            notifier,
        }
    }
}

#[async_trait]
impl Stage<RouteJob> for DocumentRouter {
    fn name(&self) -> &'static str {
        "router"
    }

    fn failure_reason(&self) -> &'static str {
        "routing_error"
    }

    fn job_document_id(&self, job: &RouteJob) -> String {
        job.document_id.clone()
    }

    async fn process(&self, job: &RouteJob) -> Result<(), PipelineError> {
        let doc = self
            .documents
            .get(&job.document_id)
            .await?
            .ok_or_else(|| {
                PipelineError::state_conflict(&job.document_id, "invoked for unknown document")
            })?;

        if doc.state == DocumentState::Failed {
            // The embed stage is an independent failure domain: its
            // failure must not cancel routing. Only upstream failures
            // stop this stage.
            let upstream_failure = matches!(
                doc.failure_reason.as_deref(),
                Some("classification_error") | Some("extraction_error")
            );
            if upstream_failure {
                return Ok(());
            }
        } else if doc.state < DocumentState::Extracted {
            return Err(PipelineError::state_conflict(
                &job.document_id,
                format!(
                    "router invoked before extraction (state {})",
                    doc.state.as_str()
                ),
            ));
        }

        let destination = organized_key(job.category, &job.document_id, &job.file_name);

        // Copy first; only a committed metadata write may mark the
        // document routed.
        self.objects
            .copy_to_organized(&job.source_key, &destination)
            .await?;
        self.documents
            .mark_routed(&job.document_id, &destination)
            .await?;

        self.notifier.publish(Notification {
            document_id: job.document_id.clone(),
            category: job.category,
            organized_key: destination,
            audience: job.category.audience().to_string(),
            timestamp: Utc::now(),
        });

        Ok(())
    }
}
