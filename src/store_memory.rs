//! In-memory [`VectorStore`] implementation.
//!
//! Brute-force cosine similarity over all stored vectors behind a
//! `std::sync::RwLock`. Suitable for tests and small corpora; the
//! normalization and filtering contract is identical to the HTTP
//! backend's, so pipeline behavior is interchangeable.

use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Chunk, SearchHit};
use crate::store::{ensure_aligned, normalize_cosine_distance, StoreQuery, VectorStore};

struct StoredRecord {
    id: String,
    document_id: String,
    content: String,
    metadata: crate::models::Metadata,
    vector: Vec<f32>,
}

pub struct MemoryStore {
    dimension: usize,
    records: RwLock<Vec<StoredRecord>>,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(Vec::new()),
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 2.0;
    }
    1.0 - dot / denom
}

fn matches_filters(record: &StoredRecord, filters: Option<&crate::models::Metadata>) -> bool {
    let Some(filters) = filters else {
        return true;
    };
    filters.iter().all(|(key, expected)| {
        if key == "documentId" {
            expected.as_str() == Some(record.document_id.as_str())
        } else {
            record.metadata.get(key) == Some(expected)
        }
    })
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn initialize_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn add_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        ensure_aligned(chunks, vectors, self.dimension)?;

        let mut records = self.records.write().expect("store lock poisoned");
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let mut metadata = chunk.metadata.clone();
            metadata.insert(
                "chunkIndex".to_string(),
                serde_json::json!(chunk.chunk_index),
            );
            if let Some(section) = &chunk.section {
                metadata.insert("section".to_string(), serde_json::json!(section));
            }
            records.push(StoredRecord {
                id: Uuid::new_v4().to_string(),
                document_id: chunk.document_id.clone(),
                content: chunk.content.clone(),
                metadata,
                vector: vector.clone(),
            });
        }

        tracing::debug!(count = chunks.len(), "chunks added to memory store");
        Ok(())
    }

    async fn search(&self, query: &StoreQuery) -> Result<Vec<SearchHit>> {
        let records = self.records.read().expect("store lock poisoned");

        let mut hits: Vec<SearchHit> = match &query.query_vector {
            Some(vector) => records
                .iter()
                .filter(|record| matches_filters(record, query.filters.as_ref()))
                .map(|record| {
                    let distance = cosine_distance(vector, &record.vector);
                    SearchHit {
                        id: record.id.clone(),
                        document_id: record.document_id.clone(),
                        content: record.content.clone(),
                        metadata: record.metadata.clone(),
                        score: normalize_cosine_distance(distance),
                        lexical_fallback: false,
                    }
                })
                .collect(),
            None => {
                // Keyword fallback: score by the fraction of query terms
                // present in the chunk. Different recall than the vector
                // path, so hits carry the fallback flag.
                tracing::warn!("no query vector supplied, using keyword fallback search");
                let query_lower = query.query_text.to_lowercase();
                let terms: Vec<&str> = query_lower.split_whitespace().collect();
                if terms.is_empty() {
                    return Ok(Vec::new());
                }
                records
                    .iter()
                    .filter(|record| matches_filters(record, query.filters.as_ref()))
                    .filter_map(|record| {
                        let content_lower = record.content.to_lowercase();
                        let matched =
                            terms.iter().filter(|t| content_lower.contains(**t)).count();
                        if matched == 0 {
                            return None;
                        }
                        Some(SearchHit {
                            id: record.id.clone(),
                            document_id: record.document_id.clone(),
                            content: record.content.clone(),
                            metadata: record.metadata.clone(),
                            score: matched as f64 / terms.len() as f64,
                            lexical_fallback: true,
                        })
                    })
                    .collect()
            }
        };

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(query.limit);
        hits.retain(|hit| hit.score >= query.min_score);

        Ok(hits)
    }

    async fn delete_by_document_id(&self, document_id: &str) -> Result<()> {
        let mut records = self.records.write().expect("store lock poisoned");
        records.retain(|record| record.document_id != document_id);
        Ok(())
    }

    async fn count(&self) -> usize {
        self.records.read().expect("store lock poisoned").len()
    }

    async fn health_check(&self) -> bool {
        true
    }
}
