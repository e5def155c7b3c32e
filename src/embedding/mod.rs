//! Embedding provider implementations.
//!
//! Concrete backends for [`magetools_core::embedding::EmbeddingProvider`]:
//! - **[`DisabledProvider`]**: always errors; the default when nothing is configured.
//! - **[`OpenAIProvider`]**: `POST /v1/embeddings`, and `POST /v1/chat/completions`
//!   for collection summaries.
//! - **[`OllamaProvider`]**: `POST /api/embed` and `POST /api/generate` on a
//!   local Ollama instance.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the provider named by the
//! configuration:
//!
//! ```rust,no_run
//! # use magetools::config::EmbeddingConfig;
//! # use magetools::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! HTTP calls use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Provider retries are off by default (`embedding.max_retries = 0`): the
//! engine wraps every store and embedding call in
//! [`with_retry`](crate::retry::with_retry), and config validation rejects
//! enabling both layers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

pub use magetools_core::embedding::{
    blob_to_vec, cosine_distance, cosine_similarity, vec_to_blob, EmbeddingProvider,
};

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Build the provider named by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A provider that refuses every request.
///
/// Syncing against it fails per book; the engine keeps running, so
/// discovery and casting still work without an embedding backend.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Shared HTTP ============

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST `body` as JSON to `url`, retrying transient failures.
///
/// `label` names the backend in error messages.
async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    label: &str,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::debug!(backend = label, %status, attempt, "transient API error");
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error ({}): {}", label, url, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", label)))
}

fn required_model(config: &EmbeddingConfig, backend: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", backend))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for {} provider", backend))?;
    Ok((model, dims))
}

fn float_array(value: &Value, what: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid response: {} is not an array", what))
        .map(|items| {
            items
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect()
        })
}

/// Check the response shape against the request.
fn check_batch(vectors: Vec<Vec<f32>>, expected: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        bail!(
            "Invalid response: expected {} embeddings, got {}",
            expected,
            vectors.len()
        );
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "Invalid response: expected {} dimensions, got {}",
            dims,
            v.len()
        );
    }
    Ok(vectors)
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable. `embedding.url`
/// overrides the API base for compatible servers.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    generation_model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            generation_model: config
                .generation_model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({"model": self.model, "input": texts});
        let response = post_json(
            &self.client,
            &format!("{}/v1/embeddings", self.base_url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        check_batch(parse_openai_embeddings(&response)?, texts.len(), self.dims)
    }

    async fn generate_content(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.generation_model,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = post_json(
            &self.client,
            &format!("{}/v1/chat/completions", self.base_url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_embeddings(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, float_array(embedding, "embedding")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with the model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    generation_model: Option<String>,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "Ollama")?;
        Ok(Self {
            model,
            dims,
            generation_model: config.generation_model.clone(),
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({"model": self.model, "input": texts});
        let response = post_json(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        check_batch(parse_ollama_embeddings(&response)?, texts.len(), self.dims)
    }

    async fn generate_content(&self, prompt: &str) -> Result<String> {
        let Some(model) = &self.generation_model else {
            bail!("embedding.generation_model not set for Ollama provider");
        };
        let body = json!({"model": model, "prompt": prompt, "stream": false});
        let response = post_json(
            &self.client,
            &format!("{}/api/generate", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        response
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing response"))
    }
}

fn parse_ollama_embeddings(json: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;
    embeddings
        .iter()
        .map(|e| float_array(e, "embedding"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_disabled() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert_eq!(provider.dims(), 0);
    }

    #[test]
    fn test_create_unknown_fails() {
        let config = EmbeddingConfig {
            provider: "quantum".into(),
            ..EmbeddingConfig::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_ollama_requires_model() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: None,
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[tokio::test]
    async fn test_disabled_embed_errors() {
        let provider = DisabledProvider;
        assert!(provider.embed(&["x".to_string()]).await.is_err());
        assert!(provider.generate_content("x").await.is_err());
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vecs = parse_openai_embeddings(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        assert!(parse_openai_embeddings(&json!({"error": "nope"})).is_err());
    }

    #[test]
    fn test_parse_ollama() {
        let json = json!({"embeddings": [[0.5, 0.5], [1.0, 0.0]]});
        let vecs = parse_ollama_embeddings(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[1], vec![1.0, 0.0]);
    }

    #[test]
    fn test_check_batch_rejects_wrong_shape() {
        assert!(check_batch(vec![vec![1.0]], 2, 1).is_err());
        assert!(check_batch(vec![vec![1.0, 2.0]], 1, 3).is_err());
        assert!(check_batch(vec![vec![1.0, 2.0]], 1, 2).is_ok());
    }
}
