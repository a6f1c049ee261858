//! Semantic Scholar connector.
//!
//! Talks to the Semantic Scholar Graph API (JSON over HTTPS) and
//! normalizes papers into canonical [`Document`]s. The request budget
//! depends on the API-key tier: roughly 1 request per second without a
//! key, 100 per second with one.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::SemanticScholarConfig;
use crate::connector::{
    classify_status, execute_with_rate_limit, Connector, SearchOptions,
};
use crate::error::{Error, Result};
use crate::models::{Document, Metadata};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

const SOURCE: &str = "semantic_scholar";
const USER_AGENT: &str = "paper-harness/0.3 (+https://github.com/parallax-labs/paper-harness)";

/// Fields requested on every paper payload.
const DEFAULT_FIELDS: &str = "paperId,title,abstract,year,venue,authors,citationCount,\
referenceCount,influentialCitationCount,isOpenAccess,fieldsOfStudy,publicationTypes,\
publicationDate,journal,externalIds,url,openAccessPdf";

pub struct SemanticScholarConnector {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    observer: Option<Box<dyn Fn(&Error, u32) + Send + Sync>>,
}

impl SemanticScholarConnector {
    pub fn new(config: &SemanticScholarConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(Error::from_http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            limiter: RateLimiter::new(
                config.effective_tokens_per_interval(),
                Duration::from_millis(config.interval_ms),
            ),
            policy: RetryPolicy {
                retryable: RetryPolicy::for_external_calls().retryable,
                ..retry
            },
            observer: None,
        })
    }

    /// Install a callback invoked on each retry of an outbound call.
    #[must_use]
    pub fn with_retry_observer(
        mut self,
        observer: impl Fn(&Error, u32) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    fn request(&self, path: &str, params: &[(String, String)]) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }

    async fn get_json(
        &self,
        path: &str,
        params: &[(String, String)],
        requested_id: Option<&str>,
    ) -> Result<serde_json::Value> {
        let response = self
            .request(path, params)
            .send()
            .await
            .map_err(Error::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(SOURCE, status, &body, requested_id));
        }

        response.json().await.map_err(Error::from_http)
    }

    async fn get_json_resilient(
        &self,
        path: &str,
        params: Vec<(String, String)>,
        requested_id: Option<&str>,
    ) -> Result<serde_json::Value> {
        execute_with_rate_limit(&self.limiter, &self.policy, self.observer.as_deref(), || {
            self.get_json(path, &params, requested_id)
        })
        .await
        .map_err(|e| match e {
            err @ Error::RetriesExhausted { .. } => {
                Error::external_with_cause(SOURCE, "request failed after retries", err)
            }
            other => other,
        })
    }

    /// Papers recommended from a given paper, normalized like search
    /// results. Shares the full resilience path.
    pub async fn recommendations(&self, paper_id: &str, limit: usize) -> Result<Vec<Document>> {
        let params = vec![
            ("limit".to_string(), limit.to_string()),
            ("fields".to_string(), DEFAULT_FIELDS.to_string()),
        ];

        tracing::debug!(paper_id, limit, "fetching semantic scholar recommendations");

        let value = self
            .get_json_resilient(
                &format!("/paper/{}/recommendations", paper_id),
                params,
                Some(paper_id),
            )
            .await?;

        let papers = value
            .get("recommendedPapers")
            .and_then(|p| p.as_array())
            .ok_or_else(|| Error::external(SOURCE, "missing recommendedPapers in response"))?;

        papers.iter().map(paper_to_document).collect()
    }
}

#[async_trait]
impl Connector for SemanticScholarConnector {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<Document>> {
        let mut params = vec![
            ("query".to_string(), query.to_string()),
            ("limit".to_string(), options.max_results.to_string()),
            ("offset".to_string(), options.offset.to_string()),
            ("fields".to_string(), DEFAULT_FIELDS.to_string()),
        ];
        if let Some(year) = &options.year {
            params.push(("year".to_string(), year.clone()));
        }
        if let Some(min_citations) = options.min_citations {
            params.push(("minCitationCount".to_string(), min_citations.to_string()));
        }
        if !options.fields_of_study.is_empty() {
            params.push((
                "fieldsOfStudy".to_string(),
                options.fields_of_study.join(","),
            ));
        }

        tracing::debug!(query, max_results = options.max_results, "searching semantic scholar");

        let value = self
            .get_json_resilient("/paper/search", params, None)
            .await?;

        let papers = value
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::external(SOURCE, "missing data array in search response"))?;

        tracing::debug!(
            count = papers.len(),
            total = value.get("total").and_then(|t| t.as_u64()).unwrap_or(0),
            "semantic scholar search returned papers"
        );

        papers.iter().map(paper_to_document).collect()
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Document> {
        let params = vec![("fields".to_string(), DEFAULT_FIELDS.to_string())];

        tracing::debug!(paper_id = id, "fetching semantic scholar paper");

        let value = self
            .get_json_resilient(&format!("/paper/{}", id), params, Some(id))
            .await?;
        paper_to_document(&value)
    }

    async fn health_check(&self) -> bool {
        let result = self
            .request(
                "/paper/search",
                &[
                    ("query".to_string(), "test".to_string()),
                    ("limit".to_string(), "1".to_string()),
                ],
            )
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Typed view of the fields we consume from a paper payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: String,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<i32>,
    venue: Option<String>,
    citation_count: Option<u64>,
    fields_of_study: Option<Vec<String>>,
    publication_types: Option<Vec<String>>,
    publication_date: Option<String>,
    journal: Option<S2Journal>,
    external_ids: Option<serde_json::Map<String, serde_json::Value>>,
    url: Option<String>,
    open_access_pdf: Option<S2OpenAccessPdf>,
    authors: Option<Vec<S2Author>>,
}

#[derive(Debug, Deserialize)]
struct S2Journal {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2OpenAccessPdf {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Author {
    name: Option<String>,
}

fn paper_to_document(raw: &serde_json::Value) -> Result<Document> {
    let paper: S2Paper = serde_json::from_value(raw.clone())
        .map_err(|e| Error::external(SOURCE, format!("malformed paper payload: {}", e)))?;

    let title = paper.title.as_deref().unwrap_or("").trim().to_string();
    let abstract_text = paper
        .abstract_text
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_string();

    let mut metadata = Metadata::new();
    if let Some(year) = paper.year {
        metadata.insert("year".to_string(), json!(year));
    }
    let venue = paper
        .venue
        .filter(|v| !v.is_empty())
        .or(paper.journal.and_then(|j| j.name));
    if let Some(venue) = venue {
        metadata.insert("venue".to_string(), json!(venue));
    }
    if let Some(citations) = paper.citation_count {
        metadata.insert("citations".to_string(), json!(citations));
    }
    if let Some(date) = &paper.publication_date {
        metadata.insert("published_at".to_string(), json!(date));
    }
    if let Some(topics) = &paper.fields_of_study {
        if !topics.is_empty() {
            metadata.insert("topics".to_string(), json!(topics));
        }
    }
    if let Some(kinds) = &paper.publication_types {
        if !kinds.is_empty() {
            metadata.insert("categories".to_string(), json!(kinds));
        }
    }
    if let Some(ids) = &paper.external_ids {
        if let Some(doi) = ids.get("DOI").and_then(|v| v.as_str()) {
            metadata.insert("doi".to_string(), json!(doi));
        }
        if let Some(arxiv_id) = ids.get("ArXiv").and_then(|v| v.as_str()) {
            metadata.insert("arxiv_id".to_string(), json!(arxiv_id));
        }
    }
    if let Some(pdf) = paper.open_access_pdf.and_then(|p| p.url) {
        metadata.insert("pdf_url".to_string(), json!(pdf));
    }
    if let Some(url) = &paper.url {
        metadata.insert("html_url".to_string(), json!(url));
    }
    let authors: Vec<String> = paper
        .authors
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| a.name.map(|n| n.trim().to_string()))
        .collect();
    if !authors.is_empty() {
        metadata.insert("authors".to_string(), json!(authors));
    }

    Ok(Document::new(SOURCE, paper.paper_id, title, abstract_text)
        .with_metadata(metadata)
        .with_raw_json(raw.clone()))
}
