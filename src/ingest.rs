//! Ingestion orchestration.
//!
//! Fans a search query out across every configured connector, dedupes
//! the fetched documents, and feeds them through the retrieval
//! pipeline. Failures are isolated per source and per document: one
//! unreachable source or one malformed paper never aborts the rest of
//! the batch. The final report carries per-document outcomes instead
//! of a single pass/fail.
//!
//! Long fan-outs support cooperative cancellation: once the token is
//! cancelled no new work starts, while in-flight calls finish normally.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::connector::{Connector, SearchOptions};
use crate::models::Document;
use crate::pipeline::{IndexReport, IndexStage, RetrievalPipeline};

/// Callback notified after each successfully indexed document, used to
/// keep an external persistence layer in sync with chunk counts.
#[async_trait]
pub trait IngestObserver: Send + Sync {
    async fn document_indexed(&self, document_id: &str, chunk_count: usize);
}

/// One document that failed to index, with the stage that failed.
#[derive(Debug, Clone)]
pub struct DocumentFailure {
    pub document_id: String,
    pub stage: IndexStage,
    pub message: String,
}

/// One source whose search failed entirely.
#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source: String,
    pub message: String,
}

/// Aggregated outcome of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestionReport {
    /// Documents fetched across all sources, before deduplication.
    pub fetched: usize,
    /// Documents discarded as duplicates of an already-fetched key.
    pub deduplicated: usize,
    pub indexed: Vec<IndexReport>,
    pub failed: Vec<DocumentFailure>,
    pub source_failures: Vec<SourceFailure>,
    /// True when cancellation stopped the run before completion.
    pub cancelled: bool,
}

impl IngestionReport {
    pub fn chunks_written(&self) -> usize {
        self.indexed.iter().map(|r| r.chunk_count).sum()
    }
}

/// Health of every collaborator the orchestrator depends on.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub sources: Vec<(String, bool)>,
    pub store_healthy: bool,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.store_healthy && self.sources.iter().all(|(_, healthy)| *healthy)
    }
}

pub struct IngestionOrchestrator {
    connectors: Vec<Arc<dyn Connector>>,
    pipeline: Arc<RetrievalPipeline>,
    observer: Option<Arc<dyn IngestObserver>>,
}

impl IngestionOrchestrator {
    pub fn new(connectors: Vec<Arc<dyn Connector>>, pipeline: Arc<RetrievalPipeline>) -> Self {
        Self {
            connectors,
            pipeline,
            observer: None,
        }
    }

    /// Install an observer notified after each indexed document.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Search every connector for `query`, dedupe, and index the results.
    pub async fn ingest(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> IngestionReport {
        let mut report = IngestionReport::default();

        let documents = self.fetch_all(query, options, cancel, &mut report).await;
        let documents = dedupe(documents, &mut report);

        for document in &documents {
            if cancel.is_cancelled() {
                tracing::info!("ingestion cancelled, stopping before next document");
                report.cancelled = true;
                break;
            }

            match self.pipeline.index_document(document).await {
                Ok(index_report) => {
                    if let Some(observer) = &self.observer {
                        observer
                            .document_indexed(&index_report.document_id, index_report.chunk_count)
                            .await;
                    }
                    report.indexed.push(index_report);
                }
                Err(failure) => {
                    tracing::warn!(
                        document_id = %document.doc_key(),
                        stage = %failure.stage,
                        error = %failure.error,
                        "document failed to index"
                    );
                    report.failed.push(DocumentFailure {
                        document_id: document.doc_key(),
                        stage: failure.stage,
                        message: failure.error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            fetched = report.fetched,
            deduplicated = report.deduplicated,
            indexed = report.indexed.len(),
            failed = report.failed.len(),
            chunks = report.chunks_written(),
            "ingestion run finished"
        );

        report
    }

    /// Probe every connector and the store. Never errors; readiness
    /// surfaces turn this into their own response shape.
    pub async fn health_report(&self) -> HealthReport {
        let mut sources = Vec::with_capacity(self.connectors.len());
        for connector in &self.connectors {
            let healthy = connector.health_check().await;
            sources.push((connector.source().to_string(), healthy));
        }

        HealthReport {
            sources,
            store_healthy: self.pipeline.store_healthy().await,
        }
    }

    /// Concurrent search across all connectors. Source-level failures
    /// are recorded, not propagated.
    async fn fetch_all(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
        report: &mut IngestionReport,
    ) -> Vec<Document> {
        let mut set = JoinSet::new();

        for connector in &self.connectors {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let connector = connector.clone();
            let source = connector.source().to_string();
            let query = query.to_string();
            let options = options.clone();

            set.spawn(async move {
                let result = connector.search(&query, &options).await;
                (source, result)
            });
        }

        let mut documents = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((source, Ok(mut fetched))) => {
                    tracing::debug!(source = %source, count = fetched.len(), "source returned documents");
                    documents.append(&mut fetched);
                }
                Ok((source, Err(error))) => {
                    tracing::warn!(source = %source, error = %error, "source search failed");
                    report.source_failures.push(SourceFailure {
                        source,
                        message: error.to_string(),
                    });
                }
                Err(join_error) => {
                    tracing::warn!(error = %join_error, "source task panicked");
                    report.source_failures.push(SourceFailure {
                        source: "(unknown)".to_string(),
                        message: join_error.to_string(),
                    });
                }
            }
        }

        report.fetched = documents.len();
        documents
    }
}

/// Drop documents whose composite key was already seen. The same paper
/// reached through two different sources keeps both records, since keys
/// embed the source name.
fn dedupe(documents: Vec<Document>, report: &mut IngestionReport) -> Vec<Document> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::with_capacity(documents.len());

    for document in documents {
        if seen.insert(document.doc_key()) {
            unique.push(document);
        } else {
            report.deduplicated += 1;
        }
    }

    unique
}
