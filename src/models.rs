//! Core data models used throughout Paper Harness.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Open key/value bag carried on documents and chunks.
///
/// JSON-encoded at the vector-store boundary, structured everywhere else.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Canonical normalized record of one ingested paper.
///
/// Constructed only by connectors; immutable afterwards except for
/// metadata enrichment. `source` plus `source_id` form the unique
/// composite key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Original payload as returned by the source, retained for audit.
    pub raw_json: Option<serde_json::Value>,
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        source: impl Into<String>,
        source_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
            title: title.into(),
            body: body.into(),
            metadata: Metadata::new(),
            raw_json: None,
            fetched_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_raw_json(mut self, raw: serde_json::Value) -> Self {
        self.raw_json = Some(raw);
        self
    }

    /// Composite key identifying this document across sources.
    pub fn doc_key(&self) -> String {
        format!("{}:{}", self.source, self.source_id)
    }

    /// Content hash over identity and body, for change detection.
    pub fn dedup_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        hasher.update(self.source_id.as_bytes());
        hasher.update(self.body.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A contiguous slice of a document's body, the unit of retrieval.
///
/// `chunk_index` defines reading order; metadata is propagated from the
/// owning document so a chunk is self-describing for citation purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub section: Option<String>,
    pub page: Option<u32>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A chunk paired with its dense vector and the model that produced it.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub model: String,
}

/// One result of a vector-store query.
///
/// `score` is a normalized similarity in `[0, 1]` — 1 means identical, 0
/// maximally dissimilar under the store's distance metric, regardless of
/// backend. Ephemeral; constructed per query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: Metadata,
    pub score: f64,
    /// True when this hit came from the keyword fallback path rather
    /// than vector similarity (different recall characteristics).
    pub lexical_fallback: bool,
}

/// The query plus its ranked, threshold-filtered hits; handed to the
/// downstream answer generator and never persisted.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

impl RetrievedContext {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_key_composite() {
        let doc = Document::new("arxiv", "1706.03762", "Attention Is All You Need", "abstract");
        assert_eq!(doc.doc_key(), "arxiv:1706.03762");
    }

    #[test]
    fn test_dedup_hash_tracks_body() {
        let a = Document::new("arxiv", "1", "t", "body one");
        let b = Document::new("arxiv", "1", "t", "body two");
        let c = Document::new("arxiv", "1", "different title", "body one");
        assert_ne!(a.dedup_hash(), b.dedup_hash());
        // Title changes don't invalidate the hash; identity and body do.
        assert_eq!(a.dedup_hash(), c.dedup_hash());
    }
}
