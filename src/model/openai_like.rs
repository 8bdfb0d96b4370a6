//! HTTP model provider speaking the OpenAI-compatible API
//! (`/v1/chat/completions`, `/v1/embeddings`) served by LM Studio,
//! Ollama, vLLM and friends.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::ModelProvider;
use crate::core::errors::PipelineError;

#[derive(Clone)]
pub struct OpenAiLikeProvider {
    base_url: String,
    chat_model: String,
    embedding_model: String,
    client: Client,
}

impl OpenAiLikeProvider {
    pub fn new(base_url: String, chat_model: String, embedding_model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_model,
            embedding_model,
            client: Client::new(),
        }
    }

    async fn chat_completion(
        &self,
        stage: &'static str,
        prompt: &str,
        max_tokens: i64,
    ) -> Result<String, PipelineError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.chat_model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1,
            "max_tokens": max_tokens,
            "stream": false,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| PipelineError::capability(stage, err))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(PipelineError::Capability {
                stage,
                message: format!("chat completion failed ({status}): {text}"),
            });
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|err| PipelineError::capability(stage, err))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        if content.is_empty() {
            return Err(PipelineError::Capability {
                stage,
                message: "empty completion".to_string(),
            });
        }

        Ok(content)
    }
}

/// Strip a surrounding ```json fence, if the model wrapped its output.
fn strip_json_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[async_trait]
impl ModelProvider for OpenAiLikeProvider {
    fn name(&self) -> &str {
        "openai-like"
    }

    async fn classify(&self, text: &str, labels: &[&str]) -> Result<String, PipelineError> {
        let label_list = labels
            .iter()
            .map(|label| format!("\"{label}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "Document types: [{label_list}]\n\
             Classify this document clearly into one type. Reply with the type only.\n\n\
             Document Content:\n{text}"
        );

        let completion = self.chat_completion("classifier", &prompt, 100).await?;
        Ok(completion.trim().to_lowercase())
    }

    async fn extract(&self, text: &str, fields: &[&str]) -> Result<Value, PipelineError> {
        let field_list = fields
            .iter()
            .map(|field| format!("\"{field}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "Extract the following fields as structured JSON. It is very important \
             that you do not reply with anything else than the JSON output: [{field_list}].\n\n\
             Document:\n{text}"
        );

        let completion = self.chat_completion("extractor", &prompt, 500).await?;
        let json_text = strip_json_fences(&completion);

        serde_json::from_str::<Value>(json_text).map_err(|err| PipelineError::Capability {
            stage: "extractor",
            message: format!("unparseable extraction output: {err}"),
        })
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.embedding_model,
            "input": inputs,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| PipelineError::capability("embedder", err))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(PipelineError::Capability {
                stage: "embedder",
                message: format!("embeddings call failed ({status}): {text}"),
            });
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|err| PipelineError::capability("embedder", err))?;

        let data = payload["data"]
            .as_array()
            .ok_or_else(|| PipelineError::Capability {
                stage: "embedder",
                message: "missing data array in embeddings response".to_string(),
            })?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item["embedding"]
                .as_array()
                .ok_or_else(|| PipelineError::Capability {
                    stage: "embedder",
                    message: "missing embedding in response item".to_string(),
                })?;
            vectors.push(
                embedding
                    .iter()
                    .filter_map(|v| v.as_f64())
                    .map(|v| v as f32)
                    .collect(),
            );
        }

        if vectors.len() != inputs.len() {
            return Err(PipelineError::Capability {
                stage: "embedder",
                message: format!(
                    "expected {} embeddings, got {}",
                    inputs.len(),
                    vectors.len()
                ),
            });
        }

        Ok(vectors)
    }

    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        self.chat_completion("generator", prompt, 500).await
    }
}
