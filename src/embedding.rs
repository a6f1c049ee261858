//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and the OpenAI-compatible
//! HTTP implementation. Batches of texts become vectors in the same
//! order; the provider reports its fixed vector width so the store can
//! validate compatibility before any data is written.
//!
//! Batch failures propagate as-is — there is no partial-batch silent
//! drop and no retry at this layer; resilience belongs to the callers
//! that own a retry policy.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Trait for embedding backends.
///
/// `embed` preserves input order and 1:1 length correspondence. An
/// empty input returns an empty output without any network call.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text. Convenience wrapper over [`embed`](Self::embed).
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed(&texts).await?;
        if vectors.is_empty() {
            return Err(Error::external("embedding", "empty embedding response"));
        }
        Ok(vectors.remove(0))
    }

    /// Fixed output width for the configured model.
    fn dimension(&self) -> usize;

    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
}

/// Vector width for models whose dimensionality is well known.
fn known_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// Embedding provider calling an OpenAI-compatible `/embeddings` endpoint.
///
/// Requests are batched in groups of `batch_size` to respect backend
/// request-size limits. Response items are re-ordered by their `index`
/// field before reassembly, so output order always matches input order
/// even if the backend answers out of order.
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    batch_size: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .or_else(|| known_dimension(&config.model))
            .ok_or_else(|| {
                Error::validation(format!(
                    "embedding.dims required for unknown model '{}'",
                    config.model
                ))
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::from_http)?;

        tracing::debug!(model = %config.model, dims, "embedding provider initialized");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dims,
            batch_size: config.batch_size,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.model,
            "input": batch,
        });

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(Error::from_http)?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(Error::rate_limited(
                    format!("embedding backend returned 429: {}", body_text.trim()),
                    None,
                ));
            }
            if status.is_server_error() {
                return Err(Error::transient(format!(
                    "embedding backend returned {}: {}",
                    status,
                    body_text.trim()
                )));
            }
            return Err(Error::external(
                "embedding",
                format!("unexpected status {}: {}", status, body_text.trim()),
            ));
        }

        let payload: serde_json::Value = response.json().await.map_err(Error::from_http)?;
        parse_embedding_response(&payload, batch.len(), self.dims)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(count = texts.len(), "generating embeddings");

        let mut vectors = Vec::with_capacity(texts.len());
        let total_batches = texts.len().div_ceil(self.batch_size);

        for (batch_number, batch) in texts.chunks(self.batch_size).enumerate() {
            let batch_vectors = self.embed_batch(batch).await?;
            vectors.extend(batch_vectors);
            tracing::debug!(
                batch = batch_number + 1,
                total = total_batches,
                "embedding batch processed"
            );
        }

        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Extract `data[].embedding` in input order, validating count and width.
fn parse_embedding_response(
    payload: &serde_json::Value,
    expected_count: usize,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>> {
    let data = payload
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::external("embedding", "missing data array in response"))?;

    if data.len() != expected_count {
        return Err(Error::external(
            "embedding",
            format!(
                "response contained {} embeddings for {} inputs",
                data.len(),
                expected_count
            ),
        ));
    }

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vector: Vec<f32> = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::external("embedding", "missing embedding in response item"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vector.len() != expected_dims {
            return Err(Error::DimensionMismatch {
                expected: expected_dims,
                actual: vector.len(),
            });
        }

        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

/// Create the configured [`EmbeddingProvider`].
///
/// Backends are variants selected by the config's `provider` tag, not a
/// class hierarchy.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbeddingProvider::new(config)?)),
        other => Err(Error::validation(format!(
            "unknown embedding provider: '{}'",
            other
        ))),
    }
}
