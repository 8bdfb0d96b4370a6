use async_trait::async_trait;
use serde_json::Value;

use crate::core::errors::PipelineError;

/// The model capabilities consumed by the pipeline and the chat path.
///
/// The pipeline never talks to a concrete provider; stages hold a
/// `dyn ModelProvider` so tests can script every call. The HTTP
/// implementation lives in `openai_like`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for logs (e.g. "openai-like").
    fn name(&self) -> &str;

    /// Classify a document into one of `labels`. Returns the raw label
    /// text; callers project it onto their closed set.
    async fn classify(&self, text: &str, labels: &[&str]) -> Result<String, PipelineError>;

    /// Extract the named fields from a document as a JSON object.
    async fn extract(&self, text: &str, fields: &[&str]) -> Result<Value, PipelineError>;

    /// Embed each input string into a fixed-dimension vector.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    /// Free-form generation for the RAG answer.
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError>;
}
