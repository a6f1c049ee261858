//! Retrieval pipeline orchestration.
//!
//! [`RetrievalPipeline`] wires the chunker, embedding provider, and
//! vector store together behind two entry points: `index_document`
//! (document → chunks → vectors → stored records) and `query`
//! (text → query vector → ranked hits → assembled context).
//!
//! Indexing is all-or-nothing at the batch level: an embedding failure
//! writes nothing, and a store failure after embedding surfaces to the
//! caller, who re-runs idempotently. Failures carry the stage they
//! occurred in, since a chunking failure (bad input) calls for a
//! different response than an embedding or storage failure (external
//! dependency, typically transient).

use std::fmt;
use std::sync::Arc;

use crate::chunker::Chunker;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::{Document, EmbeddedChunk, RetrievedContext};
use crate::store::{StoreQuery, VectorStore};

/// Stage of an index operation, reported on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStage {
    Chunking,
    Embedding,
    Storing,
}

impl fmt::Display for IndexStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStage::Chunking => write!(f, "chunking"),
            IndexStage::Embedding => write!(f, "embedding"),
            IndexStage::Storing => write!(f, "storing"),
        }
    }
}

/// An index operation that did not complete, tagged with its stage.
#[derive(Debug)]
pub struct IndexFailure {
    pub stage: IndexStage,
    pub error: Error,
}

impl fmt::Display for IndexFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "indexing failed during {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for IndexFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Successful index outcome.
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub document_id: String,
    pub chunk_count: usize,
}

/// Store statistics for readiness checks.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub total_chunks: usize,
    pub healthy: bool,
}

pub struct RetrievalPipeline {
    chunker: Chunker,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl RetrievalPipeline {
    /// All collaborators are injected; tests substitute fakes.
    pub fn new(
        chunker: Chunker,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            chunker,
            provider,
            store,
        }
    }

    /// Chunk and embed one document without touching the store.
    ///
    /// Chunk order is preserved: sequence indices are assigned in
    /// document order and the embedding provider returns vectors in
    /// input order, so the embedded chunks mirror reading order. Each
    /// result is tagged with the model that produced its vector.
    pub async fn embed_document(
        &self,
        document: &Document,
    ) -> std::result::Result<Vec<EmbeddedChunk>, IndexFailure> {
        let chunks = self.chunker.chunk(document).map_err(|error| IndexFailure {
            stage: IndexStage::Chunking,
            error,
        })?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .provider
            .embed(&texts)
            .await
            .map_err(|error| IndexFailure {
                stage: IndexStage::Embedding,
                error,
            })?;

        let model = self.provider.model_name().to_string();
        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk {
                chunk,
                vector,
                model: model.clone(),
            })
            .collect())
    }

    /// Chunk, embed, and store one document.
    pub async fn index_document(
        &self,
        document: &Document,
    ) -> std::result::Result<IndexReport, IndexFailure> {
        let document_id = document.doc_key();
        tracing::debug!(document_id = %document_id, "indexing document");

        let embedded = self.embed_document(document).await?;
        let (chunks, vectors): (Vec<_>, Vec<_>) = embedded
            .into_iter()
            .map(|e| (e.chunk, e.vector))
            .unzip();

        self.store
            .add_chunks(&chunks, &vectors)
            .await
            .map_err(|error| IndexFailure {
                stage: IndexStage::Storing,
                error,
            })?;

        tracing::info!(
            document_id = %document_id,
            chunks = chunks.len(),
            "document indexed"
        );

        Ok(IndexReport {
            document_id,
            chunk_count: chunks.len(),
        })
    }

    /// Retrieve ranked context for a query.
    ///
    /// An embedding failure fails the whole query; the lexical fallback
    /// for vector-less searches lives inside the store, not here.
    pub async fn query(
        &self,
        text: &str,
        limit: usize,
        min_score: f64,
    ) -> Result<RetrievedContext> {
        if text.trim().is_empty() {
            return Err(Error::validation("query text must not be empty"));
        }

        let vector = self.provider.embed_one(text).await?;
        let hits = self
            .store
            .search(&StoreQuery {
                query_text: text.to_string(),
                query_vector: Some(vector),
                limit,
                min_score,
                filters: None,
            })
            .await?;

        tracing::debug!(query = text, hits = hits.len(), "context retrieved");

        Ok(RetrievedContext {
            query: text.to_string(),
            hits,
        })
    }

    /// Remove a document's chunks from the store.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.store.delete_by_document_id(document_id).await
    }

    /// Store chunk count and health, for readiness surfaces.
    pub async fn stats(&self) -> PipelineStats {
        PipelineStats {
            total_chunks: self.store.count().await,
            healthy: self.store.health_check().await,
        }
    }

    /// Store health only; used by orchestration readiness checks.
    pub async fn store_healthy(&self) -> bool {
        self.store.health_check().await
    }
}

/// Format retrieved context for inclusion in a generation prompt.
///
/// Deterministic and pure: numbered entries with score and document id,
/// joined by a fixed separator.
pub fn format_context(context: &RetrievedContext) -> String {
    let sections = context
        .hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[{}] (score: {:.2}, document: {})\n{}",
                i + 1,
                hit.score,
                hit.document_id,
                hit.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        "Query: {}\n\nRelevant Context:\n\n{}",
        context.query, sections
    )
}
