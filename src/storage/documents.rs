//! Document metadata table and the per-document state machine.
//!
//! Every write is an idempotent upsert keyed by `document_id`; the state
//! machine only moves forward, so a late duplicate trigger converges to
//! the state the first delivery produced.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::core::errors::PipelineError;

/// Closed category label set, matching the classifier prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Invoice,
    Receipt,
    Contract,
    Report,
    Other,
}

impl Category {
    pub const LABELS: [&'static str; 5] = ["invoice", "receipt", "contract", "report", "other"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Invoice => "invoice",
            Category::Receipt => "receipt",
            Category::Contract => "contract",
            Category::Report => "report",
            Category::Other => "other",
        }
    }

    /// Project a raw model label onto the closed set. Anything the model
    /// answers outside the set becomes `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "invoice" => Category::Invoice,
            "receipt" => Category::Receipt,
            "contract" => Category::Contract,
            "report" => Category::Report,
            _ => Category::Other,
        }
    }

    /// Logical recipient audience carried in notification payloads.
    pub fn audience(&self) -> &'static str {
        match self {
            Category::Invoice | Category::Receipt => "accounting",
            Category::Contract => "legal",
            Category::Report | Category::Other => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Uploaded,
    Classifying,
    Classified,
    Extracting,
    Extracted,
    Routed,
    Embedding,
    Embedded,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Uploaded => "uploaded",
            DocumentState::Classifying => "classifying",
            DocumentState::Classified => "classified",
            DocumentState::Extracting => "extracting",
            DocumentState::Extracted => "extracted",
            DocumentState::Routed => "routed",
            DocumentState::Embedding => "embedding",
            DocumentState::Embedded => "embedded",
            DocumentState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "uploaded" => DocumentState::Uploaded,
            "classifying" => DocumentState::Classifying,
            "classified" => DocumentState::Classified,
            "extracting" => DocumentState::Extracting,
            "extracted" => DocumentState::Extracted,
            "routed" => DocumentState::Routed,
            "embedding" => DocumentState::Embedding,
            "embedded" => DocumentState::Embedded,
            "failed" => DocumentState::Failed,
            _ => return None,
        })
    }

    /// Position on the happy path; `Failed` is terminal and outside it.
    fn ordinal(&self) -> u8 {
        match self {
            DocumentState::Uploaded => 0,
            DocumentState::Classifying => 1,
            DocumentState::Classified => 2,
            DocumentState::Extracting => 3,
            DocumentState::Extracted => 4,
            DocumentState::Routed => 5,
            DocumentState::Embedding => 6,
            DocumentState::Embedded => 7,
            DocumentState::Failed => u8::MAX,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub source_key: String,
    pub file_name: String,
    pub category: Option<Category>,
    pub extracted_fields: Option<serde_json::Value>,
    pub organized_key: Option<String>,
    pub state: DocumentState,
    pub failure_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub routed_at: Option<String>,
    pub embedded_at: Option<String>,
}

pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, PipelineError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                document_id TEXT PRIMARY KEY,
                source_key TEXT NOT NULL,
                file_name TEXT NOT NULL,
                category TEXT,
                extracted_fields TEXT,
                organized_key TEXT,
                state TEXT NOT NULL DEFAULT 'uploaded',
                failure_reason TEXT,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                routed_at TEXT,
                embedded_at TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dead_letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                reason TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(())
    }

    /// First sighting of an object creates the row; retriggers with the
    /// same `document_id` leave the existing row untouched.
    pub async fn ensure_document(
        &self,
        document_id: &str,
        source_key: &str,
        file_name: &str,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT OR IGNORE INTO documents (document_id, source_key, file_name, state)
             VALUES (?1, ?2, ?3, 'uploaded')",
        )
        .bind(document_id)
        .bind(source_key)
        .bind(file_name)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;
        Ok(())
    }

    pub async fn get(&self, document_id: &str) -> Result<Option<DocumentRecord>, PipelineError> {
        let row = sqlx::query("SELECT * FROM documents WHERE document_id = ?1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        Ok(row.as_ref().map(row_to_record))
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<DocumentRecord>, PipelineError> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY created_at DESC LIMIT ?1")
            .bind(limit.max(1))
            .fetch_all(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Move the document forward on the happy path. Equal or earlier
    /// states are a no-op (duplicate trigger), `Failed` is sticky.
    pub async fn advance_state(
        &self,
        document_id: &str,
        state: DocumentState,
    ) -> Result<(), PipelineError> {
        let current = self.require(document_id).await?;
        if current.state == DocumentState::Failed || current.state.ordinal() >= state.ordinal() {
            return Ok(());
        }

        let mut query = String::from("UPDATE documents SET state = ?1, updated_at = ?2");
        if state == DocumentState::Embedded {
            query.push_str(", embedded_at = ?2");
        }
        query.push_str(" WHERE document_id = ?3 AND state != 'failed'");

        sqlx::query(&query)
            .bind(state.as_str())
            .bind(now())
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        Ok(())
    }

    /// Terminal failure with a stage reason. Never resurrects and never
    /// changes the reason of an already-failed document.
    pub async fn mark_failed(&self, document_id: &str, reason: &str) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE documents
             SET state = 'failed', failure_reason = ?1, updated_at = ?2
             WHERE document_id = ?3 AND state != 'failed'",
        )
        .bind(reason)
        .bind(now())
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;
        Ok(())
    }

    /// Idempotent: a retried classification writes the same category.
    pub async fn set_category(
        &self,
        document_id: &str,
        category: Category,
    ) -> Result<(), PipelineError> {
        sqlx::query("UPDATE documents SET category = ?1, updated_at = ?2 WHERE document_id = ?3")
            .bind(category.as_str())
            .bind(now())
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        Ok(())
    }

    pub async fn set_extracted_fields(
        &self,
        document_id: &str,
        fields: &serde_json::Value,
    ) -> Result<(), PipelineError> {
        let payload = serde_json::to_string(fields).map_err(PipelineError::storage)?;
        sqlx::query(
            "UPDATE documents SET extracted_fields = ?1, updated_at = ?2 WHERE document_id = ?3",
        )
        .bind(payload)
        .bind(now())
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;
        Ok(())
    }

    /// The router's metadata commit. `organized_key` and `routed_at`
    /// are written directly: the sibling embedding stage may have moved
    /// the coarse state past `Routed` (or failed) in the meantime, and
    /// routing completion must stay observable either way.
    pub async fn mark_routed(
        &self,
        document_id: &str,
        organized_key: &str,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE documents SET organized_key = ?1, routed_at = ?2, updated_at = ?2
             WHERE document_id = ?3",
        )
        .bind(organized_key)
        .bind(now())
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        self.advance_state(document_id, DocumentState::Routed).await
    }

    pub async fn record_dead_letter(
        &self,
        document_id: &str,
        stage: &str,
        reason: &str,
        attempts: u32,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO dead_letters (document_id, stage, reason, attempts)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(document_id)
        .bind(stage)
        .bind(reason)
        .bind(attempts as i64)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;
        Ok(())
    }

    pub async fn dead_letter_count(&self, document_id: &str) -> Result<usize, PipelineError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters WHERE document_id = ?1")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(PipelineError::storage)?;
        Ok(count as usize)
    }

    async fn require(&self, document_id: &str) -> Result<DocumentRecord, PipelineError> {
        self.get(document_id).await?.ok_or_else(|| {
            PipelineError::state_conflict(document_id, "document row missing")
        })
    }
}

fn now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> DocumentRecord {
    let category: Option<String> = row.get("category");
    let fields: Option<String> = row.get("extracted_fields");
    let state: String = row.get("state");

    DocumentRecord {
        document_id: row.get("document_id"),
        source_key: row.get("source_key"),
        file_name: row.get("file_name"),
        category: category.as_deref().map(Category::from_label),
        extracted_fields: fields.as_deref().and_then(|f| serde_json::from_str(f).ok()),
        organized_key: row.get("organized_key"),
        state: DocumentState::parse(&state).unwrap_or(DocumentState::Failed),
        failure_reason: row.get("failure_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        routed_at: row.get("routed_at"),
        embedded_at: row.get("embedded_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connect;

    async fn test_store() -> (tempfile::TempDir, DocumentStore) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = connect(&tmp.path().join("test.db")).await.unwrap();
        let store = DocumentStore::new(pool).await.unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn ensure_document_is_idempotent() {
        let (_tmp, store) = test_store().await;

        store.ensure_document("d1", "k1", "a.txt").await.unwrap();
        store.advance_state("d1", DocumentState::Classified).await.unwrap();
        // retrigger of the same object key must not reset anything
        store.ensure_document("d1", "k1", "a.txt").await.unwrap();

        let doc = store.get("d1").await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::Classified);
        assert_eq!(doc.source_key, "k1");
    }

    #[tokio::test]
    async fn state_never_moves_backwards() {
        let (_tmp, store) = test_store().await;
        store.ensure_document("d1", "k1", "a.txt").await.unwrap();

        store.advance_state("d1", DocumentState::Extracted).await.unwrap();
        store.advance_state("d1", DocumentState::Classifying).await.unwrap();

        let doc = store.get("d1").await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::Extracted);
    }

    #[tokio::test]
    async fn failed_is_sticky() {
        let (_tmp, store) = test_store().await;
        store.ensure_document("d1", "k1", "a.txt").await.unwrap();

        store.mark_failed("d1", "classification_error").await.unwrap();
        store.advance_state("d1", DocumentState::Classified).await.unwrap();
        store.mark_failed("d1", "some_other_reason").await.unwrap();

        let doc = store.get("d1").await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::Failed);
        assert_eq!(doc.failure_reason.as_deref(), Some("classification_error"));
    }

    #[tokio::test]
    async fn mark_routed_sets_key_state_and_timestamp() {
        let (_tmp, store) = test_store().await;
        store.ensure_document("d1", "k1", "a.txt").await.unwrap();
        store.set_category("d1", Category::Invoice).await.unwrap();
        store.advance_state("d1", DocumentState::Extracted).await.unwrap();

        store.mark_routed("d1", "invoice/d1-a.txt").await.unwrap();
        // retried routing hits the same deterministic key
        store.mark_routed("d1", "invoice/d1-a.txt").await.unwrap();

        let doc = store.get("d1").await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::Routed);
        assert_eq!(doc.organized_key.as_deref(), Some("invoice/d1-a.txt"));
        assert!(doc.routed_at.is_some());
        assert_eq!(doc.category, Some(Category::Invoice));
    }

    #[tokio::test]
    async fn dead_letters_accumulate() {
        let (_tmp, store) = test_store().await;
        store.ensure_document("d1", "k1", "a.txt").await.unwrap();

        store
            .record_dead_letter("d1", "router", "routing_error", 3)
            .await
            .unwrap();
        assert_eq!(store.dead_letter_count("d1").await.unwrap(), 1);
    }

    #[test]
    fn category_projection_and_audience() {
        assert_eq!(Category::from_label(" Invoice \n"), Category::Invoice);
        assert_eq!(Category::from_label("memo"), Category::Other);
        assert_eq!(Category::Invoice.audience(), "accounting");
        assert_eq!(Category::Contract.audience(), "legal");
        assert_eq!(Category::Report.audience(), "general");
    }
}
