//! TOML configuration for connectors, embedding, store, chunking, and retry.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub arxiv: Option<ArxivConfig>,
    pub semantic_scholar: Option<SemanticScholarConfig>,
}

/// arXiv export API settings. The default budget of 3 requests per
/// second follows the API's polite-use guidance.
#[derive(Debug, Deserialize, Clone)]
pub struct ArxivConfig {
    #[serde(default = "default_arxiv_base_url")]
    pub base_url: String,
    #[serde(default = "default_arxiv_tokens_per_interval")]
    pub tokens_per_interval: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            base_url: default_arxiv_base_url(),
            tokens_per_interval: default_arxiv_tokens_per_interval(),
            interval_ms: default_interval_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Semantic Scholar Graph API settings. Without an API key the service
/// allows roughly 1 request per second; with a key, 100 per second.
/// `tokens_per_interval` overrides the key-derived default when set.
#[derive(Debug, Deserialize, Clone)]
pub struct SemanticScholarConfig {
    #[serde(default = "default_s2_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub tokens_per_interval: Option<u32>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SemanticScholarConfig {
    fn default() -> Self {
        Self {
            base_url: default_s2_base_url(),
            api_key: None,
            tokens_per_interval: None,
            interval_ms: default_interval_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SemanticScholarConfig {
    /// Effective request budget per interval, derived from the API key
    /// tier unless overridden.
    pub fn effective_tokens_per_interval(&self) -> u32 {
        self.tokens_per_interval
            .unwrap_or(if self.api_key.is_some() { 100 } else { 1 })
    }
}

fn default_arxiv_base_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}
fn default_arxiv_tokens_per_interval() -> u32 {
    3
}
fn default_s2_base_url() -> String {
    "https://api.semanticscholar.org/graph/v1".to_string()
}
fn default_interval_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector width; required unless the model is one the provider knows.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            base_url: default_embedding_base_url(),
            api_key: None,
            model: default_embedding_model(),
            dims: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_class_name")]
    pub class_name: String,
    /// Must match the embedding provider's vector width.
    pub dimension: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_store_backend() -> String {
    "memory".to_string()
}
fn default_class_name() -> String {
    "PaperChunk".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_min_chunk_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            retryable: Vec::new(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::validation(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::validation(format!("failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(Error::validation("chunking.chunk_size must be > 0"));
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        return Err(Error::validation(
            "chunking.chunk_overlap must be < chunking.chunk_size",
        ));
    }
    if config.chunking.min_chunk_size > config.chunking.chunk_size {
        return Err(Error::validation(
            "chunking.min_chunk_size must be <= chunking.chunk_size",
        ));
    }

    if config.store.dimension == 0 {
        return Err(Error::validation("store.dimension must be > 0"));
    }
    match config.store.backend.as_str() {
        "memory" => {}
        "weaviate" => {
            if config.store.url.is_none() {
                return Err(Error::validation(
                    "store.url is required for the weaviate backend",
                ));
            }
        }
        other => {
            return Err(Error::validation(format!(
                "unknown store backend: '{}'. Use weaviate or memory.",
                other
            )));
        }
    }

    if config.embedding.batch_size == 0 {
        return Err(Error::validation("embedding.batch_size must be > 0"));
    }
    match config.embedding.provider.as_str() {
        "openai" => {}
        other => {
            return Err(Error::validation(format!(
                "unknown embedding provider: '{}'",
                other
            )));
        }
    }

    if config.retry.max_attempts == 0 {
        return Err(Error::validation("retry.max_attempts must be >= 1"));
    }

    for connector in [
        config.connectors.arxiv.as_ref().map(|c| ("arxiv", c.tokens_per_interval, c.interval_ms)),
        config
            .connectors
            .semantic_scholar
            .as_ref()
            .map(|c| ("semantic_scholar", c.effective_tokens_per_interval(), c.interval_ms)),
    ]
    .into_iter()
    .flatten()
    {
        let (name, tokens, interval) = connector;
        if tokens == 0 {
            return Err(Error::validation(format!(
                "connectors.{}.tokens_per_interval must be > 0",
                name
            )));
        }
        if interval == 0 {
            return Err(Error::validation(format!(
                "connectors.{}.interval_ms must be > 0",
                name
            )));
        }
    }

    Ok(())
}
