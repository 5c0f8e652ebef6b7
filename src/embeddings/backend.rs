//! Embedding backend contract (§4.7), ported from the teacher's
//! `embedding.rs` provider/retry pattern but generalized to a configurable
//! HTTP endpoint instead of a hardcoded OpenAI client.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::EmbeddingConfig;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, same length and order as the input. An
    /// empty batch returns empty without a request.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed(std::slice::from_ref(&text.to_string())).await?;
        results.pop().ok_or_else(|| anyhow::anyhow!("embedding backend returned no vectors"))
    }
}

/// Backend selection: the configured backend if supported, else the
/// `none` fallback — there is exactly one real backend in this fallback
/// chain, so selection only ever distinguishes "configured" from "absent".
pub fn create_backend(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingBackend>> {
    match config.backend.as_str() {
        "http" => Ok(Box::new(HttpEmbeddingBackend::new(config)?)),
        "none" => Ok(Box::new(NullBackend)),
        other => bail!("Unknown embedding backend: {}", other),
    }
}

/// No-op backend: every call fails. Selected when `embedding.backend = "none"`.
pub struct NullBackend;

#[async_trait]
impl EmbeddingBackend for NullBackend {
    fn name(&self) -> &str {
        "none"
    }
    fn model(&self) -> &str {
        "none"
    }
    fn dimension(&self) -> usize {
        0
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        bail!("Embedding backend is not configured (embedding.backend = \"none\")")
    }
}

/// An HTTP embeddings endpoint speaking the OpenAI-compatible
/// `{"model": ..., "input": [...]}` -> `{"data": [{"embedding": [...]}]}`
/// shape, with exponential-backoff retry on 429/5xx (teacher's retry
/// strategy, generalized past a hardcoded `api.openai.com` host).
pub struct HttpEmbeddingBackend {
    model: String,
    dimension: usize,
    api_base: String,
    api_key: Option<String>,
    max_retries: u32,
    timeout: Duration,
}

impl HttpEmbeddingBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| anyhow::anyhow!("embedding.model required for the http backend"))?;
        let dimension = config.dimension.ok_or_else(|| anyhow::anyhow!("embedding.dimension required for the http backend"))?;
        let api_base = config.api_base.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let api_key = config.api_key_env.as_ref().and_then(|var| std::env::var(var).ok());

        Ok(Self { model, dimension, api_base, api_key, max_retries: config.max_retries, timeout: Duration::from_secs(config.timeout_secs) })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    fn name(&self) -> &str {
        "http"
    }
    fn model(&self) -> &str {
        &self.model
    }
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let url = format!("{}/embeddings", self.api_base.trim_end_matches('/'));
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = client.post(&url).header("Content-Type", "application/json").json(&body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {key}"));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embeddings_response(&json);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!("embedding backend error {}: {}", status, text));
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    bail!("embedding backend error {}: {}", status, text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding request failed after retries")))
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing data array"))?;
    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item.get("embedding").and_then(|e| e.as_array()).ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing embedding"))?;
        embeddings.push(embedding.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect());
    }
    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_backend_passes_through_empty_batch() {
        let backend = NullBackend;
        assert_eq!(backend.embed(&[]).await.unwrap(), Vec::<Vec<f32>>::new());
    }

    #[tokio::test]
    async fn null_backend_rejects_nonempty_batch() {
        let backend = NullBackend;
        assert!(backend.embed(&["hello".to_string()]).await.is_err());
    }
}
