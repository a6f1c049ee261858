//! arXiv connector.
//!
//! Talks to the arXiv export API (Atom XML over HTTP) and normalizes
//! entries into canonical [`Document`]s. The default rate budget of
//! 3 requests per second follows arXiv's polite-use guidance.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;
use serde_json::json;

use crate::config::ArxivConfig;
use crate::connector::{
    classify_status, execute_with_rate_limit, Connector, SearchOptions, SortBy, SortOrder,
};
use crate::error::{Error, Result};
use crate::models::{Document, Metadata};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

const SOURCE: &str = "arxiv";
const USER_AGENT: &str = "paper-harness/0.3 (+https://github.com/parallax-labs/paper-harness)";

pub struct ArxivConnector {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    policy: RetryPolicy,
    observer: Option<Box<dyn Fn(&Error, u32) + Send + Sync>>,
}

impl ArxivConnector {
    pub fn new(config: &ArxivConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(Error::from_http)?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            limiter: RateLimiter::new(
                config.tokens_per_interval,
                Duration::from_millis(config.interval_ms),
            ),
            // NotFound and malformed-payload errors must not burn retries.
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

    async fn fetch_feed(&self, params: &[(String, String)]) -> Result<String> {
        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .await
            .map_err(Error::from_http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::from_http)?;
        if !status.is_success() {
            return Err(classify_status(SOURCE, status, &body, None));
        }
        Ok(body)
    }

    async fn fetch_feed_resilient(&self, params: Vec<(String, String)>) -> Result<String> {
        execute_with_rate_limit(&self.limiter, &self.policy, self.observer.as_deref(), || {
            self.fetch_feed(&params)
        })
        .await
        .map_err(|e| match e {
            err @ Error::RetriesExhausted { .. } => Error::external_with_cause(
                SOURCE,
                "request failed after retries".to_string(),
                err,
            ),
            other => other,
        })
    }
}

#[async_trait]
impl Connector for ArxivConnector {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<Document>> {
        let params = vec![
            ("search_query".to_string(), format!("all:{}", query)),
            ("start".to_string(), options.offset.to_string()),
            ("max_results".to_string(), options.max_results.to_string()),
            ("sortBy".to_string(), sort_by_param(options.sort_by).to_string()),
            (
                "sortOrder".to_string(),
                sort_order_param(options.sort_order).to_string(),
            ),
        ];

        tracing::debug!(query, max_results = options.max_results, "searching arxiv");

        let body = self.fetch_feed_resilient(params).await?;
        let entries = parse_feed(&body)?;
        tracing::debug!(count = entries.len(), "arxiv search returned entries");

        Ok(entries.into_iter().map(entry_to_document).collect())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Document> {
        let params = vec![("id_list".to_string(), id.to_string())];

        tracing::debug!(arxiv_id = id, "fetching arxiv paper");

        let body = self.fetch_feed_resilient(params).await?;
        let mut entries = parse_feed(&body)?;

        // An unknown id comes back as an empty feed, not an HTTP 404.
        if entries.is_empty() {
            return Err(Error::not_found(SOURCE, id));
        }
        Ok(entry_to_document(entries.remove(0)))
    }

    async fn health_check(&self) -> bool {
        let result = self
            .client
            .get(&self.base_url)
            .query(&[("search_query", "all:test"), ("max_results", "1")])
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn sort_by_param(sort_by: SortBy) -> &'static str {
    match sort_by {
        SortBy::Relevance => "relevance",
        SortBy::SubmittedDate => "submittedDate",
        SortBy::UpdatedDate => "lastUpdatedDate",
    }
}

fn sort_order_param(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Ascending => "ascending",
        SortOrder::Descending => "descending",
    }
}

/// One `<entry>` from the Atom feed, before normalization.
#[derive(Debug, Default, Clone, Serialize)]
struct ArxivEntry {
    id: String,
    title: String,
    summary: String,
    published: String,
    updated: String,
    authors: Vec<String>,
    categories: Vec<String>,
    doi: Option<String>,
    journal_ref: Option<String>,
    pdf_url: Option<String>,
    html_url: Option<String>,
}

fn parse_err(message: impl std::fmt::Display) -> Error {
    Error::external(SOURCE, format!("malformed feed: {}", message))
}

/// Pull-parse the Atom feed into entries. Only elements inside `<entry>`
/// are considered; feed-level `<id>`/`<title>` are ignored.
fn parse_feed(xml: &str) -> Result<Vec<ArxivEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<ArxivEntry> = None;
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                if name == "entry" {
                    current = Some(ArxivEntry::default());
                } else if current.is_some() && (name == "link" || name == "category") {
                    apply_attributes(current.as_mut().unwrap(), &name, &start)?;
                }
                path.push(name);
            }
            Ok(Event::Empty(empty)) => {
                let name = String::from_utf8_lossy(empty.name().as_ref()).into_owned();
                if let Some(entry) = current.as_mut() {
                    if name == "link" || name == "category" {
                        apply_attributes(entry, &name, &empty)?;
                    }
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(entry) = current.as_mut() {
                    let value = text.unescape().map_err(parse_err)?;
                    apply_text(entry, &path, &value);
                }
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                if name == "entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(parse_err(e)),
        }
    }

    Ok(entries)
}

fn apply_text(entry: &mut ArxivEntry, path: &[String], value: &str) {
    let in_author = path.iter().any(|p| p == "author");
    match path.last().map(String::as_str) {
        Some("id") if !in_author => entry.id.push_str(value),
        Some("title") => entry.title.push_str(value),
        Some("summary") => entry.summary.push_str(value),
        Some("published") => entry.published.push_str(value),
        Some("updated") => entry.updated.push_str(value),
        Some("name") if in_author => entry.authors.push(value.trim().to_string()),
        Some("arxiv:doi") => entry.doi = Some(value.trim().to_string()),
        Some("arxiv:journal_ref") => entry.journal_ref = Some(value.trim().to_string()),
        _ => {}
    }
}

fn apply_attributes(
    entry: &mut ArxivEntry,
    element: &str,
    tag: &quick_xml::events::BytesStart<'_>,
) -> Result<()> {
    let mut href = None;
    let mut rel = None;
    let mut kind = None;
    let mut title = None;
    let mut term = None;

    for attr in tag.attributes() {
        let attr = attr.map_err(parse_err)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(parse_err)?.into_owned();
        match key.as_str() {
            "href" => href = Some(value),
            "rel" => rel = Some(value),
            "type" => kind = Some(value),
            "title" => title = Some(value),
            "term" => term = Some(value),
            _ => {}
        }
    }

    match element {
        "category" => {
            if let Some(term) = term {
                entry.categories.push(term);
            }
        }
        "link" => {
            let is_pdf = title.as_deref() == Some("pdf")
                || kind.as_deref() == Some("application/pdf");
            let is_html =
                rel.as_deref() == Some("alternate") && kind.as_deref() == Some("text/html");
            if is_pdf {
                entry.pdf_url = href;
            } else if is_html {
                entry.html_url = href;
            }
        }
        _ => {}
    }

    Ok(())
}

/// Strip the `arxiv.org/abs/` prefix from a full entry id URL.
fn extract_arxiv_id(id: &str) -> String {
    match id.find("arxiv.org/abs/") {
        Some(pos) => id[pos + "arxiv.org/abs/".len()..].to_string(),
        None => id.to_string(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn entry_to_document(entry: ArxivEntry) -> Document {
    let arxiv_id = extract_arxiv_id(&entry.id);
    let title = collapse_whitespace(&entry.title);
    let abstract_text = collapse_whitespace(&entry.summary);

    let mut metadata = Metadata::new();
    if let Ok(published) = DateTime::parse_from_rfc3339(&entry.published) {
        metadata.insert("year".to_string(), json!(published.year()));
        metadata.insert("month".to_string(), json!(published.month()));
    }
    if !entry.published.is_empty() {
        metadata.insert("published_at".to_string(), json!(entry.published));
    }
    if let Some(venue) = &entry.journal_ref {
        metadata.insert("venue".to_string(), json!(venue));
    }
    if let Some(doi) = &entry.doi {
        metadata.insert("doi".to_string(), json!(doi));
    }
    if !entry.authors.is_empty() {
        metadata.insert("authors".to_string(), json!(entry.authors));
    }
    if !entry.categories.is_empty() {
        metadata.insert("categories".to_string(), json!(entry.categories));
    }
    if let Some(pdf_url) = &entry.pdf_url {
        metadata.insert("pdf_url".to_string(), json!(pdf_url));
    }
    if let Some(html_url) = &entry.html_url {
        metadata.insert("html_url".to_string(), json!(html_url));
    }

    let raw = serde_json::to_value(&entry).unwrap_or(serde_json::Value::Null);

    Document::new(SOURCE, arxiv_id, title, abstract_text)
        .with_metadata(metadata)
        .with_raw_json(raw)
}
