//! Second stage: pull structured fields out of a classified document,
//! then fan out to routing and embedding as two independent jobs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::bus::{EmbedJob, ExtractJob, RouteJob, Stage, StageBus};
use crate::core::errors::PipelineError;
use crate::model::ModelProvider;
use crate::storage::documents::{Category, DocumentState, DocumentStore};
use crate::storage::object_store::ObjectStore;

/// Field lists requested from the extraction model, per category.
pub fn fields_for(category: Category) -> &'static [&'static str] {
    match category {
        Category::Invoice => &[
            "customer_id",
            "customer_name",
            "order_id",
            "total_amount",
            "order_date",
        ],
        Category::Receipt => &[
            "vendor_name",
            "transaction_date",
            "total_amount",
            "payment_method",
        ],
        Category::Report => &["report_title", "report_date", "author", "summary"],
        Category::Contract | Category::Other => {
            &["vendor_name", "document_number", "date", "amount"]
        }
    }
}

pub struct Extractor {
    objects: Arc<ObjectStore>,
    documents: Arc<DocumentStore>,
    model: Arc<dyn ModelProvider>,
    bus: StageBus,
}

impl Extractor {
    pub fn new(
        objects: Arc<ObjectStore>,
        documents: Arc<DocumentStore>,
        model: Arc<dyn ModelProvider>,
        bus: StageBus,
    ) -> Self {
        Self {
            objects,
            documents,
            model,
            bus,
        }
    }
}

#[async_trait]
impl Stage<ExtractJob> for Extractor {
    fn name(&self) -> &'static str {
        "extractor"
    }

    fn failure_reason(&self) -> &'static str {
        "extraction_error"
    }

    fn job_document_id(&self, job: &ExtractJob) -> String {
        job.document_id.clone()
    }

    async fn process(&self, job: &ExtractJob) -> Result<(), PipelineError> {
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
        if doc.state < DocumentState::Classified {
            return Err(PipelineError::state_conflict(
                &job.document_id,
                format!(
                    "extractor invoked before classification (state {})",
                    doc.state.as_str()
                ),
            ));
        }

        // Duplicate trigger after a successful extraction reuses the
        // stored fields instead of asking the model again.
        let fields: Value = if let (Some(fields), true) = (
            doc.extracted_fields.clone(),
            doc.state >= DocumentState::Extracted,
        ) {
            fields
        } else {
            self.documents
                .advance_state(&job.document_id, DocumentState::Extracting)
                .await?;

            let text = self.objects.read_incoming(&job.source_key).await?;
            let fields = self.model.extract(&text, fields_for(job.category)).await?;

            self.documents
                .set_extracted_fields(&job.document_id, &fields)
                .await?;
            self.documents
                .advance_state(&job.document_id, DocumentState::Extracted)
                .await?;

            tracing::info!(document_id = %job.document_id, "fields extracted");
            fields
        };

        // Fan-out: two one-way messages, independent failure domains. A
        // full route queue must not block embedding or vice versa.
        if let Err(err) = self
            .bus
            .send_route(RouteJob {
                document_id: job.document_id.clone(),
                source_key: job.source_key.clone(),
                file_name: job.file_name.clone(),
                category: job.category,
                extracted_fields: fields,
            })
            .await
        {
            tracing::warn!(document_id = %job.document_id, "route enqueue failed: {err}");
        }

        if let Err(err) = self
            .bus
            .send_embed(EmbedJob {
                document_id: job.document_id.clone(),
                source_key: job.source_key.clone(),
            })
            .await
        {
            tracing::warn!(document_id = %job.document_id, "embed enqueue failed: {err}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_a_field_list() {
        for label in Category::LABELS {
            let category = Category::from_label(label);
            assert!(!fields_for(category).is_empty());
        }
    }

    #[test]
    fn invoice_fields_match_the_schema() {
        assert!(fields_for(Category::Invoice).contains(&"total_amount"));
        assert!(fields_for(Category::Receipt).contains(&"payment_method"));
    }
}
