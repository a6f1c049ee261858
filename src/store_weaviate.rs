//! Weaviate [`VectorStore`] backend.
//!
//! Talks to a Weaviate instance over its REST and GraphQL APIs:
//! schema lifecycle via `/v1/schema`, batched inserts via
//! `/v1/batch/objects`, `nearVector` search (or BM25 keyword fallback)
//! via `/v1/graphql`, and deletion via a batch delete with a
//! `documentId` where-filter. Vectors are always supplied by the
//! caller; server-side vectorization is disabled on the class.
//!
//! Weaviate reports cosine distance in `[0, 2]` (0 = identical), which
//! [`normalize_cosine_distance`] maps onto the `[0, 1]` score contract.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, Metadata, SearchHit};
use crate::store::{ensure_aligned, normalize_cosine_distance, StoreQuery, VectorStore};

pub struct WeaviateStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    class_name: String,
    dimension: usize,
}

impl WeaviateStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let url = config
            .url
            .as_ref()
            .ok_or_else(|| Error::validation("store.url is required for the weaviate backend"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::from_http)?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            class_name: config.class_name.clone(),
            dimension: config.dimension,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn graphql(&self, query: String) -> Result<serde_json::Value> {
        let response = self
            .request(reqwest::Method::POST, "/v1/graphql")
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(Error::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(Error::transient(format!(
                    "weaviate returned {}: {}",
                    status,
                    body.trim()
                )));
            }
            return Err(Error::external(
                "weaviate",
                format!("unexpected status {}: {}", status, body.trim()),
            ));
        }

        let payload: serde_json::Value = response.json().await.map_err(Error::from_http)?;

        if let Some(errors) = payload.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let message = errors[0]
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown GraphQL error")
                    .to_string();
                // A missing class shows up as an unresolvable field on Get/Aggregate.
                if message.contains("Cannot query field") {
                    return Err(Error::schema(message));
                }
                return Err(Error::external("weaviate", message));
            }
        }

        Ok(payload)
    }
}

#[async_trait]
impl VectorStore for WeaviateStore {
    async fn initialize_schema(&self) -> Result<()> {
        let existing = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/schema/{}", self.class_name),
            )
            .send()
            .await
            .map_err(Error::from_http)?;

        if existing.status().is_success() {
            tracing::debug!(class = %self.class_name, "schema already exists");
            return Ok(());
        }
        if existing.status() != reqwest::StatusCode::NOT_FOUND {
            let status = existing.status();
            let body = existing.text().await.unwrap_or_default();
            return Err(Error::schema(format!(
                "schema lookup returned {}: {}",
                status,
                body.trim()
            )));
        }

        let class = json!({
            "class": self.class_name,
            "description": "Paper chunks for retrieval",
            "vectorizer": "none",
            "properties": [
                { "name": "content", "dataType": ["text"], "description": "Chunk content" },
                { "name": "documentId", "dataType": ["string"], "description": "Owning document id" },
                { "name": "chunkIndex", "dataType": ["int"], "description": "Chunk index in document" },
                { "name": "section", "dataType": ["string"], "description": "Section label" },
                { "name": "metadata", "dataType": ["text"], "description": "Additional metadata (JSON string)" },
            ],
        });

        let response = self
            .request(reqwest::Method::POST, "/v1/schema")
            .json(&class)
            .send()
            .await
            .map_err(Error::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::schema(format!(
                "schema creation returned {}: {}",
                status,
                body.trim()
            )));
        }

        tracing::info!(class = %self.class_name, "schema created");
        Ok(())
    }

    async fn add_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        ensure_aligned(chunks, vectors, self.dimension)?;
        if chunks.is_empty() {
            return Ok(());
        }

        let objects: Vec<serde_json::Value> = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vector)| {
                json!({
                    "class": self.class_name,
                    "id": Uuid::new_v4().to_string(),
                    "properties": {
                        "content": chunk.content,
                        "documentId": chunk.document_id,
                        "chunkIndex": chunk.chunk_index,
                        "section": chunk.section.clone().unwrap_or_default(),
                        "metadata": serde_json::Value::Object(chunk.metadata.clone()).to_string(),
                    },
                    "vector": vector,
                })
            })
            .collect();

        let response = self
            .request(reqwest::Method::POST, "/v1/batch/objects")
            .json(&json!({ "objects": objects }))
            .send()
            .await
            .map_err(Error::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(Error::transient(format!(
                    "weaviate batch insert returned {}: {}",
                    status,
                    body.trim()
                )));
            }
            return Err(Error::external(
                "weaviate",
                format!("batch insert returned {}: {}", status, body.trim()),
            ));
        }

        // The batch endpoint reports per-object failures in a 200 body.
        let results: serde_json::Value = response.json().await.map_err(Error::from_http)?;
        if let Some(items) = results.as_array() {
            for item in items {
                let errors = item
                    .pointer("/result/errors/error")
                    .and_then(|e| e.as_array());
                if let Some(errors) = errors {
                    if let Some(message) = errors
                        .first()
                        .and_then(|e| e.get("message"))
                        .and_then(|m| m.as_str())
                    {
                        if message.contains("class") {
                            return Err(Error::schema(message.to_string()));
                        }
                        return Err(Error::external("weaviate", message.to_string()));
                    }
                }
            }
        }

        tracing::debug!(count = chunks.len(), "chunks added to weaviate");
        Ok(())
    }

    async fn search(&self, query: &StoreQuery) -> Result<Vec<SearchHit>> {
        let where_clause = query
            .filters
            .as_ref()
            .and_then(|filters| filters.get("documentId"))
            .and_then(|v| v.as_str())
            .map(|id| {
                format!(
                    r#", where: {{ path: ["documentId"], operator: Equal, valueString: "{}" }}"#,
                    escape_graphql(id)
                )
            })
            .unwrap_or_default();

        let (selector, lexical) = match &query.query_vector {
            Some(vector) => {
                let vector_json =
                    serde_json::to_string(vector).map_err(|e| Error::external("weaviate", e.to_string()))?;
                (
                    format!("nearVector: {{ vector: {} }}", vector_json),
                    false,
                )
            }
            None => {
                tracing::warn!("no query vector supplied, using BM25 keyword search");
                (
                    format!(
                        r#"bm25: {{ query: "{}" }}"#,
                        escape_graphql(&query.query_text)
                    ),
                    true,
                )
            }
        };

        let additional = if lexical { "id score" } else { "id distance" };
        let graphql_query = format!(
            "{{ Get {{ {}(limit: {}, {}{}) {{ content documentId chunkIndex section metadata _additional {{ {} }} }} }} }}",
            self.class_name, query.limit, selector, where_clause, additional
        );

        let payload = self.graphql(graphql_query).await?;
        let items = payload
            .pointer(&format!("/data/Get/{}", self.class_name))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut hits: Vec<SearchHit> = items
            .iter()
            .map(|item| parse_hit(item, lexical))
            .collect();

        if lexical {
            // BM25 scores are unbounded; rescale relative to the top hit
            // so the [0, 1] contract holds on this path too.
            let max = hits.iter().map(|h| h.score).fold(0.0f64, f64::max);
            if max > 0.0 {
                for hit in &mut hits {
                    hit.score = (hit.score / max).clamp(0.0, 1.0);
                }
            }
        }

        hits.retain(|hit| hit.score >= query.min_score);
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(
            total = items.len(),
            kept = hits.len(),
            lexical,
            "weaviate search completed"
        );
        Ok(hits)
    }

    async fn delete_by_document_id(&self, document_id: &str) -> Result<()> {
        let body = json!({
            "match": {
                "class": self.class_name,
                "where": {
                    "path": ["documentId"],
                    "operator": "Equal",
                    "valueString": document_id,
                },
            },
        });

        let response = self
            .request(reqwest::Method::DELETE, "/v1/batch/objects")
            .json(&body)
            .send()
            .await
            .map_err(Error::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(Error::transient(format!(
                    "weaviate batch delete returned {}: {}",
                    status,
                    body_text.trim()
                )));
            }
            return Err(Error::external(
                "weaviate",
                format!("batch delete returned {}: {}", status, body_text.trim()),
            ));
        }

        tracing::debug!(document_id, "chunks deleted from weaviate");
        Ok(())
    }

    async fn count(&self) -> usize {
        let query = format!(
            "{{ Aggregate {{ {} {{ meta {{ count }} }} }} }}",
            self.class_name
        );

        match self.graphql(query).await {
            Ok(payload) => payload
                .pointer(&format!("/data/Aggregate/{}/0/meta/count", self.class_name))
                .and_then(|c| c.as_u64())
                .unwrap_or(0) as usize,
            Err(e) => {
                tracing::warn!(error = %e, "count query failed, reporting 0");
                0
            }
        }
    }

    async fn health_check(&self) -> bool {
        let result = self
            .request(reqwest::Method::GET, "/v1/.well-known/ready")
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn escape_graphql(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn parse_hit(item: &serde_json::Value, lexical: bool) -> SearchHit {
    let mut metadata: Metadata = item
        .get("metadata")
        .and_then(|m| m.as_str())
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    if let Some(index) = item.get("chunkIndex").and_then(|i| i.as_u64()) {
        metadata.insert("chunkIndex".to_string(), json!(index));
    }
    if let Some(section) = item.get("section").and_then(|s| s.as_str()) {
        if !section.is_empty() {
            metadata.insert("section".to_string(), json!(section));
        }
    }

    let score = if lexical {
        // BM25 score arrives as a string; raw value, rescaled by the caller.
        item.pointer("/_additional/score")
            .and_then(|s| match s {
                serde_json::Value::String(s) => s.parse::<f64>().ok(),
                serde_json::Value::Number(n) => n.as_f64(),
                _ => None,
            })
            .unwrap_or(0.0)
    } else {
        let distance = item
            .pointer("/_additional/distance")
            .and_then(|d| d.as_f64())
            .unwrap_or(0.0);
        normalize_cosine_distance(distance)
    };

    SearchHit {
        id: item
            .pointer("/_additional/id")
            .and_then(|i| i.as_str())
            .unwrap_or_default()
            .to_string(),
        document_id: item
            .get("documentId")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string(),
        content: item
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string(),
        metadata,
        score,
        lexical_fallback: lexical,
    }
}
