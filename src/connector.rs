//! Connector abstraction for external paper sources.
//!
//! A connector owns everything needed to talk to one third-party API:
//! an HTTP client with a timeout, a [`RateLimiter`] tuned to that
//! source's published quota, and a [`RetryPolicy`]. Raw payloads are
//! normalized into the canonical [`Document`] shape at this boundary —
//! no source-shaped data crosses into the retrieval pipeline, and no
//! raw transport error escapes a connector.
//!
//! # Implementors
//!
//! - [`ArxivConnector`](crate::connector_arxiv::ArxivConnector)
//! - [`SemanticScholarConnector`](crate::connector_s2::SemanticScholarConnector)

use std::future::Future;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{Error, Result};
use crate::models::Document;
use crate::rate_limit::RateLimiter;
use crate::retry::{retry_with_policy, RetryObserver, RetryPolicy};

/// Sort key for source searches. Sources that don't support a given
/// key fall back to their native relevance ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Relevance,
    SubmittedDate,
    UpdatedDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Pagination, sorting, and filter options for a source search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_results: usize,
    pub offset: usize,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    /// Year or year range filter (e.g. `"2020"` or `"2018-2022"`),
    /// honored by sources that support it.
    pub year: Option<String>,
    pub min_citations: Option<u32>,
    pub fields_of_study: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 20,
            offset: 0,
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
            year: None,
            min_citations: None,
            fields_of_study: Vec::new(),
        }
    }
}

/// A source of research papers.
///
/// Every network call is routed through the connector's rate limiter and
/// retry policy via [`execute_with_rate_limit`]. Terminal failures
/// surface as typed errors so callers can distinguish "source
/// unavailable" from "bad query" from "no such paper".
#[async_trait]
pub trait Connector: Send + Sync {
    /// Source label used on documents from this connector (e.g. `"arxiv"`).
    fn source(&self) -> &str;

    /// Search the source and return normalized documents.
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<Document>>;

    /// Fetch one paper by its source-local identifier.
    ///
    /// Returns [`Error::NotFound`] when the source reports no such item,
    /// as distinct from a transient failure.
    async fn fetch_by_id(&self, id: &str) -> Result<Document>;

    /// Cheap readiness probe with a short timeout. Never errors and
    /// never retries; any failure means `false`.
    async fn health_check(&self) -> bool;
}

/// Route one outbound call through a rate limiter and retry policy.
///
/// Waits for a token first, then runs the operation under the retry
/// executor. This is the single resilience path all connector calls
/// share; health checks bypass it deliberately.
pub async fn execute_with_rate_limit<T, F, Fut>(
    limiter: &RateLimiter,
    policy: &RetryPolicy,
    observer: Option<RetryObserver<'_>>,
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    limiter.acquire().await;
    retry_with_policy(policy, observer, op).await
}

/// Map a non-success HTTP status from a source into the error taxonomy.
///
/// 429 is a rate limit, 404 means the item does not exist, 5xx is
/// transient; anything else is a terminal source error.
pub(crate) fn classify_status(
    source: &str,
    status: StatusCode,
    body: &str,
    requested_id: Option<&str>,
) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Error::rate_limited(format!("{} returned 429: {}", source, body.trim()), None);
    }
    if status == StatusCode::NOT_FOUND {
        return Error::not_found(source, requested_id.unwrap_or("(unknown)"));
    }
    if status.is_server_error() {
        return Error::transient(format!("{} returned {}: {}", source, status, body.trim()));
    }
    Error::external(
        source,
        format!("unexpected status {}: {}", status, body.trim()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn test_status_classification() {
        let err = classify_status("arxiv", StatusCode::TOO_MANY_REQUESTS, "slow down", None);
        assert_eq!(err.kind(), ErrorKind::RateLimited);

        let err = classify_status("semantic_scholar", StatusCode::NOT_FOUND, "", Some("abc"));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = classify_status("arxiv", StatusCode::BAD_GATEWAY, "oops", None);
        assert_eq!(err.kind(), ErrorKind::Transient);

        let err = classify_status("arxiv", StatusCode::BAD_REQUEST, "bad query", None);
        assert_eq!(err.kind(), ErrorKind::ExternalSource);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_consumes_a_token_per_call() {
        let limiter = RateLimiter::new(2, Duration::from_millis(1000));
        let policy = RetryPolicy::for_external_calls();

        for _ in 0..2 {
            let result =
                execute_with_rate_limit(&limiter, &policy, None, || async { Ok::<_, Error>(()) })
                    .await;
            assert!(result.is_ok());
        }
        assert_eq!(limiter.available(), 0);
    }
}
