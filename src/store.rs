//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait defines the storage operations the
//! retrieval pipeline needs — schema lifecycle, batched insert,
//! nearest-neighbor search with score normalization, delete by
//! document, count, and health — enabling pluggable backends.
//!
//! # Score contract
//!
//! Whatever a backend's native distance metric, `search` returns hits
//! scored in `[0, 1]` where higher is more similar, and filters by
//! `min_score` only *after* normalization. Each backend documents its
//! own distance-to-score formula; both shipped backends express cosine
//! distance in `[0, 2]` and share [`normalize_cosine_distance`].
//!
//! # Implementors
//!
//! - [`WeaviateStore`](crate::store_weaviate::WeaviateStore) — HTTP vector database backend
//! - [`MemoryStore`](crate::store_memory::MemoryStore) — brute-force in-memory backend

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, Metadata, SearchHit};

/// A nearest-neighbor query against the store.
///
/// When `query_vector` is absent the store falls back to a lexical
/// (keyword) search over chunk contents; the resulting hits are marked
/// `lexical_fallback` since that path has different recall
/// characteristics.
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    pub query_text: String,
    pub query_vector: Option<Vec<f32>>,
    pub limit: usize,
    /// Minimum normalized score a hit must reach, in `[0, 1]`.
    pub min_score: f64,
    /// Optional equality filters over stored fields; `documentId`
    /// matches the owning document, other keys match chunk metadata.
    pub filters: Option<Metadata>,
}

/// Abstract vector storage backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the target collection if it does not exist. Idempotent.
    async fn initialize_schema(&self) -> Result<()>;

    /// Insert chunks with their vectors in one batched write.
    ///
    /// Fails with [`Error::DimensionMismatch`] before any write when the
    /// chunk and vector counts differ or a vector has the wrong width.
    async fn add_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()>;

    /// Nearest-neighbor search with normalized scores (see module docs).
    async fn search(&self, query: &StoreQuery) -> Result<Vec<SearchHit>>;

    /// Remove all chunks belonging to a document. Idempotent; removing
    /// an unknown document is not an error.
    async fn delete_by_document_id(&self, document_id: &str) -> Result<()>;

    /// Total stored chunk count. Best-effort: returns 0 when the
    /// backend is unreachable rather than failing a stats call.
    async fn count(&self) -> usize;

    /// Cheap connectivity probe. Never errors.
    async fn health_check(&self) -> bool;
}

/// Convert a cosine distance in `[0, 2]` (0 = identical, 2 = opposite)
/// into a similarity score in `[0, 1]` (1 = identical).
pub fn normalize_cosine_distance(distance: f64) -> f64 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Validate chunk/vector alignment before a write: equal counts and
/// every vector at the store's configured width.
pub(crate) fn ensure_aligned(
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    dimension: usize,
) -> Result<()> {
    if chunks.len() != vectors.len() {
        return Err(Error::DimensionMismatch {
            expected: chunks.len(),
            actual: vectors.len(),
        });
    }
    for vector in vectors {
        if vector.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
    }
    Ok(())
}

/// Create the configured [`VectorStore`].
///
/// Backends are variants selected by the config's `backend` tag.
pub fn create_store(config: &StoreConfig) -> Result<std::sync::Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "memory" => Ok(std::sync::Arc::new(
            crate::store_memory::MemoryStore::new(config.dimension),
        )),
        "weaviate" => Ok(std::sync::Arc::new(
            crate::store_weaviate::WeaviateStore::new(config)?,
        )),
        other => Err(Error::validation(format!(
            "unknown store backend: '{}'",
            other
        ))),
    }
}
