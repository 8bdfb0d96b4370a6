//! Embedding chunk rows with brute-force cosine search.
//!
//! Vectors are stored as little-endian f32 BLOBs keyed by
//! `(document_id, chunk_id)`; re-embedding a document replaces its whole
//! chunk set in one transaction. A meta table pins the embedding model
//! and dimension at first write; any later mismatch is a configuration
//! error, not something to tolerate at runtime.

use sqlx::{Row, SqlitePool};

use crate::core::errors::PipelineError;

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub document_id: String,
    pub chunk_id: i64,
    pub content: String,
    pub score: f32,
}

pub struct EmbeddingStore {
    pool: SqlitePool,
}

impl EmbeddingStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, PipelineError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS document_chunks (
                document_id TEXT NOT NULL,
                chunk_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (document_id, chunk_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS embedding_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(())
    }

    /// Pin the embedding model and dimension on first use; reject any
    /// later writer or reader configured differently.
    pub async fn ensure_model(&self, model: &str, dim: usize) -> Result<(), PipelineError> {
        let stored_model: Option<String> =
            sqlx::query_scalar("SELECT value FROM embedding_meta WHERE key = 'embedding_model'")
                .fetch_optional(&self.pool)
                .await
                .map_err(PipelineError::storage)?;
        let stored_dim: Option<String> =
            sqlx::query_scalar("SELECT value FROM embedding_meta WHERE key = 'embedding_dim'")
                .fetch_optional(&self.pool)
                .await
                .map_err(PipelineError::storage)?;

        match (stored_model, stored_dim) {
            (Some(m), Some(d)) => {
                if m != model || d != dim.to_string() {
                    return Err(PipelineError::Config(format!(
                        "embedding model mismatch: store has {m}/{d}, configured {model}/{dim}"
                    )));
                }
                Ok(())
            }
            _ => {
                for (key, value) in [
                    ("embedding_model", model.to_string()),
                    ("embedding_dim", dim.to_string()),
                ] {
                    sqlx::query(
                        "INSERT OR REPLACE INTO embedding_meta (key, value, updated_at)
                         VALUES (?1, ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
                    )
                    .bind(key)
                    .bind(value)
                    .execute(&self.pool)
                    .await
                    .map_err(PipelineError::storage)?;
                }
                Ok(())
            }
        }
    }

    /// Replace the whole chunk set for a document: delete-then-insert in
    /// one transaction, ordinals assigned contiguously from 0. A re-run
    /// leaves no stale or duplicate chunks behind.
    pub async fn replace_document(
        &self,
        document_id: &str,
        chunks: &[(String, Vec<f32>)],
    ) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::storage)?;

        sqlx::query("DELETE FROM document_chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::storage)?;

        for (chunk_id, (content, embedding)) in chunks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO document_chunks (document_id, chunk_id, content, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(document_id)
            .bind(chunk_id as i64)
            .bind(content)
            .bind(serialize_embedding(embedding))
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::storage)?;
        }

        tx.commit().await.map_err(PipelineError::storage)
    }

    /// Cosine top-K over chunks of fully embedded documents only.
    /// Documents that never reached the `embedded` state are invisible
    /// to retrieval.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        let rows = sqlx::query(
            "SELECT c.document_id, c.chunk_id, c.content, c.embedding
             FROM document_chunks c
             JOIN documents d ON d.document_id = c.document_id
             WHERE d.state = 'embedded'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .filter_map(|row| {
                let bytes: Vec<u8> = row.get("embedding");
                if bytes.is_empty() {
                    return None;
                }
                let stored = deserialize_embedding(&bytes);
                Some(ScoredChunk {
                    document_id: row.get("document_id"),
                    chunk_id: row.get("chunk_id"),
                    content: row.get("content"),
                    score: cosine_similarity(query_embedding, &stored),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit.max(1));
        Ok(scored)
    }

    pub async fn chunk_count(&self, document_id: &str) -> Result<usize, PipelineError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE document_id = ?1")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(PipelineError::storage)?;
        Ok(count as usize)
    }

    pub async fn max_chunk_id(&self, document_id: &str) -> Result<Option<i64>, PipelineError> {
        sqlx::query_scalar("SELECT MAX(chunk_id) FROM document_chunks WHERE document_id = ?1")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(PipelineError::storage)
    }
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connect;
    use crate::storage::documents::{DocumentState, DocumentStore};

    async fn test_stores() -> (tempfile::TempDir, DocumentStore, EmbeddingStore) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = connect(&tmp.path().join("test.db")).await.unwrap();
        let documents = DocumentStore::new(pool.clone()).await.unwrap();
        let embeddings = EmbeddingStore::new(pool).await.unwrap();
        (tmp, documents, embeddings)
    }

    async fn embedded_doc(documents: &DocumentStore, id: &str) {
        documents.ensure_document(id, "key", "f.txt").await.unwrap();
        documents
            .advance_state(id, DocumentState::Embedded)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn replace_leaves_no_stale_chunks() {
        let (_tmp, documents, embeddings) = test_stores().await;
        embedded_doc(&documents, "d1").await;

        let first: Vec<(String, Vec<f32>)> = (0..4)
            .map(|i| (format!("chunk {i}"), vec![i as f32, 1.0]))
            .collect();
        embeddings.replace_document("d1", &first).await.unwrap();
        assert_eq!(embeddings.chunk_count("d1").await.unwrap(), 4);

        let second = vec![("only chunk".to_string(), vec![1.0, 0.0])];
        embeddings.replace_document("d1", &second).await.unwrap();

        assert_eq!(embeddings.chunk_count("d1").await.unwrap(), 1);
        assert_eq!(embeddings.max_chunk_id("d1").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_caps_at_limit() {
        let (_tmp, documents, embeddings) = test_stores().await;
        embedded_doc(&documents, "d1").await;

        let chunks = vec![
            ("east".to_string(), vec![1.0, 0.0]),
            ("north".to_string(), vec![0.0, 1.0]),
            ("northeast".to_string(), vec![0.7, 0.7]),
        ];
        embeddings.replace_document("d1", &chunks).await.unwrap();

        let results = embeddings.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "east");
        assert_eq!(results[1].content, "northeast");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn search_skips_documents_not_embedded() {
        let (_tmp, documents, embeddings) = test_stores().await;
        embedded_doc(&documents, "good").await;

        documents
            .ensure_document("bad", "key2", "g.txt")
            .await
            .unwrap();
        documents.mark_failed("bad", "embedding_error").await.unwrap();

        embeddings
            .replace_document("good", &[("visible".to_string(), vec![1.0])])
            .await
            .unwrap();
        embeddings
            .replace_document("bad", &[("hidden".to_string(), vec![1.0])])
            .await
            .unwrap();

        let results = embeddings.search(&[1.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "good");
    }

    #[tokio::test]
    async fn self_match_beats_unrelated_chunk() {
        let (_tmp, documents, embeddings) = test_stores().await;
        embedded_doc(&documents, "d1").await;

        embeddings
            .replace_document(
                "d1",
                &[
                    ("the invoice amount is 120.00".to_string(), vec![0.9, 0.1, 0.0]),
                    ("unrelated shipping note".to_string(), vec![0.0, 0.2, 0.9]),
                ],
            )
            .await
            .unwrap();

        let results = embeddings.search(&[0.9, 0.1, 0.0], 2).await.unwrap();
        assert_eq!(results[0].content, "the invoice amount is 120.00");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn model_mismatch_is_config_error() {
        let (_tmp, _documents, embeddings) = test_stores().await;

        embeddings.ensure_model("embed-v1", 3).await.unwrap();
        embeddings.ensure_model("embed-v1", 3).await.unwrap();

        let err = embeddings.ensure_model("embed-v2", 3).await.unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        let err = embeddings.ensure_model("embed-v1", 4).await.unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn embedding_blob_roundtrip() {
        let vector = vec![0.5_f32, -1.25, 3.0];
        assert_eq!(deserialize_embedding(&serialize_embedding(&vector)), vector);
    }
}
