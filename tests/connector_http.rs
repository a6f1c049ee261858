//! HTTP behavior tests for the connectors, the embedding provider, and
//! the Weaviate store, exercised against a local mock server.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use paper_harness::config::{ArxivConfig, SemanticScholarConfig, StoreConfig};
use paper_harness::connector::{Connector, SearchOptions};
use paper_harness::connector_arxiv::ArxivConnector;
use paper_harness::connector_s2::SemanticScholarConnector;
use paper_harness::embedding::{EmbeddingProvider, OpenAiEmbeddingProvider};
use paper_harness::error::Error;
use paper_harness::models::Metadata;
use paper_harness::retry::RetryPolicy;
use paper_harness::store::{StoreQuery, VectorStore};
use paper_harness::store_weaviate::WeaviateStore;

const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>ArXiv Query Results</title>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <updated>2023-08-02T00:41:18Z</updated>
    <published>2017-06-12T17:57:34Z</published>
    <title>Attention Is All You Need</title>
    <summary>The dominant sequence transduction models are based on complex recurrent networks.</summary>
    <author><name>Ashish Vaswani</name></author>
    <link title="pdf" href="http://arxiv.org/pdf/1706.03762v7" rel="related" type="application/pdf"/>
    <category term="cs.CL"/>
  </entry>
</feed>"#;

const EMPTY_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query Results</title>
</feed>"#;

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::for_external_calls()
        .with_max_attempts(max_attempts)
        .with_delays(Duration::from_millis(5), Duration::from_millis(20))
}

fn arxiv_connector(base_url: String, max_attempts: u32) -> ArxivConnector {
    let config = ArxivConfig {
        base_url,
        tokens_per_interval: 1000,
        interval_ms: 1000,
        timeout_secs: 5,
    };
    ArxivConnector::new(&config, fast_retry(max_attempts)).unwrap()
}

fn s2_connector(base_url: String, api_key: Option<String>) -> SemanticScholarConnector {
    let config = SemanticScholarConfig {
        base_url,
        api_key,
        tokens_per_interval: Some(1000),
        interval_ms: 1000,
        timeout_secs: 5,
    };
    SemanticScholarConnector::new(&config, fast_retry(3)).unwrap()
}

/// Minimal scripted HTTP server: answers one connection per canned
/// response, in order. Lets a single logical call observe a failure
/// sequence that a stateless mock cannot express.
async fn scripted_http_server(responses: Vec<String>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.flush().await;
        }
    });

    addr
}

fn http_response(status_line: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status_line,
        content_type,
        body.len(),
        body
    )
}

/// Port with nothing listening on it, for unreachable-backend tests.
async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

// ============ arXiv connector ============

#[tokio::test]
async fn test_arxiv_search_parses_and_normalizes() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/query")
                .query_param("search_query", "all:attention")
                .query_param("max_results", "20")
                .query_param("sortBy", "relevance");
            then.status(200)
                .header("content-type", "application/atom+xml")
                .body(SAMPLE_FEED);
        })
        .await;

    let connector = arxiv_connector(server.url("/api/query"), 3);
    let documents = connector
        .search("attention", &SearchOptions::default())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].doc_key(), "arxiv:1706.03762v7");
    assert_eq!(documents[0].title, "Attention Is All You Need");
    assert_eq!(documents[0].metadata.get("year"), Some(&json!(2017)));
}

#[tokio::test]
async fn test_arxiv_unknown_id_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/query")
                .query_param("id_list", "9999.99999");
            then.status(200)
                .header("content-type", "application/atom+xml")
                .body(EMPTY_FEED);
        })
        .await;

    let connector = arxiv_connector(server.url("/api/query"), 3);
    let err = connector.fetch_by_id("9999.99999").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn test_arxiv_persistent_5xx_exhausts_retries() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/query");
            then.status(503).body("down for maintenance");
        })
        .await;

    let retries = Arc::new(AtomicU32::new(0));
    let observed = retries.clone();
    let connector = arxiv_connector(server.url("/api/query"), 3).with_retry_observer(
        move |_error, _attempt| {
            observed.fetch_add(1, Ordering::SeqCst);
        },
    );

    let err = connector
        .search("anything", &SearchOptions::default())
        .await
        .unwrap_err();

    // Three attempts hit the wire; the observer saw the two retries; the
    // terminal error is a typed source error, not a raw transport one.
    assert_eq!(mock.hits_async().await, 3);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
    match err {
        Error::ExternalSource { source_name, cause, .. } => {
            assert_eq!(source_name, "arxiv");
            assert!(matches!(
                cause.as_deref(),
                Some(Error::RetriesExhausted { attempts: 3, .. })
            ));
        }
        other => panic!("expected ExternalSource, got {other}"),
    }
}

#[tokio::test]
async fn test_arxiv_fails_twice_then_succeeds() {
    let addr = scripted_http_server(vec![
        http_response("500 Internal Server Error", "text/plain", "boom"),
        http_response("500 Internal Server Error", "text/plain", "boom"),
        http_response("200 OK", "application/atom+xml", SAMPLE_FEED),
    ])
    .await;

    let retries = Arc::new(AtomicU32::new(0));
    let observed = retries.clone();
    let connector = arxiv_connector(format!("http://{}", addr), 3).with_retry_observer(
        move |_error, _attempt| {
            observed.fetch_add(1, Ordering::SeqCst);
        },
    );

    let documents = connector
        .search("attention", &SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(documents.len(), 1);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_arxiv_429_surfaces_as_rate_limited() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/query");
            then.status(429).body("too many requests");
        })
        .await;

    // Single attempt so the typed 429 comes through un-wrapped.
    let connector = arxiv_connector(server.url("/api/query"), 1);
    let err = connector
        .search("anything", &SearchOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::ExternalSource { cause, .. } => {
            let Some(cause) = cause.as_deref() else {
                panic!("missing cause");
            };
            match cause {
                Error::RetriesExhausted { source, .. } => {
                    assert!(matches!(**source, Error::RateLimited { .. }))
                }
                other => panic!("expected RetriesExhausted, got {other}"),
            }
        }
        other => panic!("expected ExternalSource, got {other}"),
    }
}

#[tokio::test]
async fn test_arxiv_health_check() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/query");
            then.status(200).body(EMPTY_FEED);
        })
        .await;

    let healthy = arxiv_connector(server.url("/api/query"), 3);
    assert!(healthy.health_check().await);

    let unreachable = arxiv_connector(dead_endpoint().await, 3);
    assert!(!unreachable.health_check().await);
}

// ============ Semantic Scholar connector ============

#[tokio::test]
async fn test_s2_search_sends_key_and_normalizes() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/graph/v1/paper/search")
                .header("x-api-key", "secret")
                .query_param("query", "attention")
                .query_param("limit", "20");
            then.status(200).json_body(json!({
                "total": 1,
                "offset": 0,
                "data": [{
                    "paperId": "649def",
                    "title": "Attention Is All You Need",
                    "abstract": "The dominant models are complex.",
                    "year": 2017,
                    "venue": "NeurIPS",
                    "citationCount": 100000,
                    "externalIds": { "ArXiv": "1706.03762" },
                    "authors": [{ "authorId": "1", "name": "Ashish Vaswani" }]
                }]
            }));
        })
        .await;

    let connector = s2_connector(server.url("/graph/v1"), Some("secret".to_string()));
    let documents = connector
        .search("attention", &SearchOptions::default())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].doc_key(), "semantic_scholar:649def");
    assert_eq!(
        documents[0].metadata.get("arxiv_id"),
        Some(&json!("1706.03762"))
    );
}

#[tokio::test]
async fn test_s2_fetch_404_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/graph/v1/paper/does-not-exist");
            then.status(404).json_body(json!({ "error": "Paper not found" }));
        })
        .await;

    let connector = s2_connector(server.url("/graph/v1"), None);
    let err = connector.fetch_by_id("does-not-exist").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn test_s2_recommendations() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/graph/v1/paper/649def/recommendations")
                .query_param("limit", "2");
            then.status(200).json_body(json!({
                "recommendedPapers": [
                    { "paperId": "rec1", "title": "BERT", "abstract": "Bidirectional encoders." },
                    { "paperId": "rec2", "title": "GPT", "abstract": "Generative pretraining." }
                ]
            }));
        })
        .await;

    let connector = s2_connector(server.url("/graph/v1"), None);
    let documents = connector.recommendations("649def", 2).await.unwrap();

    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].source_id, "rec1");
    assert_eq!(documents[1].title, "GPT");
}

// ============ Embedding provider ============

#[tokio::test]
async fn test_embedding_batches_and_preserves_order() {
    let server = MockServer::start_async().await;

    let first_batch = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings").json_body(json!({
                "model": "test-model",
                "input": ["alpha", "beta"],
            }));
            then.status(200).json_body(json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] },
                ]
            }));
        })
        .await;
    let second_batch = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings").json_body(json!({
                "model": "test-model",
                "input": ["gamma"],
            }));
            then.status(200).json_body(json!({
                "data": [ { "index": 0, "embedding": [0.5, 0.5] } ]
            }));
        })
        .await;

    let config = paper_harness::config::EmbeddingConfig {
        provider: "openai".to_string(),
        base_url: server.url("/v1"),
        api_key: Some("key".to_string()),
        model: "test-model".to_string(),
        dims: Some(2),
        batch_size: 2,
        timeout_secs: 5,
    };
    let provider = OpenAiEmbeddingProvider::new(&config).unwrap();

    let texts = vec![
        "alpha".to_string(),
        "beta".to_string(),
        "gamma".to_string(),
    ];
    let vectors = provider.embed(&texts).await.unwrap();

    assert_eq!(first_batch.hits_async().await, 1);
    assert_eq!(second_batch.hits_async().await, 1);
    // Output order matches input order even though the backend answered
    // the first batch out of order.
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]);
}

#[tokio::test]
async fn test_embedding_empty_input_makes_no_call() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(json!({ "data": [] }));
        })
        .await;

    let config = paper_harness::config::EmbeddingConfig {
        base_url: server.url("/v1"),
        dims: Some(2),
        ..Default::default()
    };
    let provider = OpenAiEmbeddingProvider::new(&config).unwrap();

    let vectors = provider.embed(&[]).await.unwrap();
    assert!(vectors.is_empty());
    assert_eq!(mock.hits_async().await, 0);
}

#[tokio::test]
async fn test_embedding_429_is_rate_limited() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(429).body("quota exhausted");
        })
        .await;

    let config = paper_harness::config::EmbeddingConfig {
        base_url: server.url("/v1"),
        dims: Some(2),
        ..Default::default()
    };
    let provider = OpenAiEmbeddingProvider::new(&config).unwrap();

    let err = provider.embed(&["text".to_string()]).await.unwrap_err();
    assert!(matches!(err, Error::RateLimited { .. }));
}

// ============ Weaviate store ============

fn weaviate_config(base_url: String) -> StoreConfig {
    StoreConfig {
        backend: "weaviate".to_string(),
        url: Some(base_url),
        api_key: None,
        class_name: "PaperChunk".to_string(),
        dimension: 2,
        timeout_secs: 5,
    }
}

fn sample_chunk(index: usize) -> paper_harness::models::Chunk {
    paper_harness::models::Chunk {
        document_id: "arxiv:1706.03762".to_string(),
        chunk_index: index,
        content: format!("chunk {}", index),
        section: None,
        page: None,
        metadata: Metadata::new(),
    }
}

#[tokio::test]
async fn test_weaviate_schema_created_when_missing() {
    let server = MockServer::start_async().await;
    let lookup = server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/schema/PaperChunk");
            then.status(404).body("not found");
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/schema")
                .json_body_partial(r#"{ "class": "PaperChunk", "vectorizer": "none" }"#);
            then.status(200).json_body(json!({ "class": "PaperChunk" }));
        })
        .await;

    let store = WeaviateStore::new(&weaviate_config(server.base_url())).unwrap();
    store.initialize_schema().await.unwrap();

    lookup.assert_async().await;
    create.assert_async().await;
}

#[tokio::test]
async fn test_weaviate_schema_idempotent_when_present() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/schema/PaperChunk");
            then.status(200).json_body(json!({ "class": "PaperChunk" }));
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/schema");
            then.status(200);
        })
        .await;

    let store = WeaviateStore::new(&weaviate_config(server.base_url())).unwrap();
    store.initialize_schema().await.unwrap();
    store.initialize_schema().await.unwrap();

    assert_eq!(create.hits_async().await, 0);
}

#[tokio::test]
async fn test_weaviate_batch_insert() {
    let server = MockServer::start_async().await;
    let batch = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/batch/objects");
            then.status(200).json_body(json!([]));
        })
        .await;

    let store = WeaviateStore::new(&weaviate_config(server.base_url())).unwrap();
    let chunks = vec![sample_chunk(0), sample_chunk(1)];
    let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];

    store.add_chunks(&chunks, &vectors).await.unwrap();
    // One batched request, not one per chunk.
    assert_eq!(batch.hits_async().await, 1);
}

#[tokio::test]
async fn test_weaviate_mismatch_rejected_before_any_write() {
    let server = MockServer::start_async().await;
    let batch = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/batch/objects");
            then.status(200).json_body(json!([]));
        })
        .await;

    let store = WeaviateStore::new(&weaviate_config(server.base_url())).unwrap();

    let err = store
        .add_chunks(&[sample_chunk(0)], &[vec![1.0, 0.0], vec![0.0, 1.0]])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));

    let err = store
        .add_chunks(&[sample_chunk(0)], &[vec![1.0, 0.0, 0.5]])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));

    assert_eq!(batch.hits_async().await, 0);
}

#[tokio::test]
async fn test_weaviate_search_normalizes_and_filters() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/graphql");
            then.status(200).json_body(json!({
                "data": { "Get": { "PaperChunk": [
                    {
                        "content": "close chunk",
                        "documentId": "arxiv:1",
                        "chunkIndex": 0,
                        "section": "",
                        "metadata": "{\"year\":2017}",
                        "_additional": { "id": "a", "distance": 0.2 }
                    },
                    {
                        "content": "far chunk",
                        "documentId": "arxiv:2",
                        "chunkIndex": 1,
                        "section": "",
                        "metadata": "{}",
                        "_additional": { "id": "b", "distance": 1.6 }
                    }
                ] } }
            }));
        })
        .await;

    let store = WeaviateStore::new(&weaviate_config(server.base_url())).unwrap();
    let hits = store
        .search(&StoreQuery {
            query_text: "q".to_string(),
            query_vector: Some(vec![1.0, 0.0]),
            limit: 10,
            min_score: 0.5,
            filters: None,
        })
        .await
        .unwrap();

    // distance 0.2 → 0.9 passes; distance 1.6 → 0.2 is filtered.
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, "arxiv:1");
    assert!((hits[0].score - 0.9).abs() < 1e-9);
    assert!(!hits[0].lexical_fallback);
    assert_eq!(hits[0].metadata.get("year"), Some(&json!(2017)));
}

#[tokio::test]
async fn test_weaviate_lexical_fallback_flagged() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/graphql");
            then.status(200).json_body(json!({
                "data": { "Get": { "PaperChunk": [
                    {
                        "content": "keyword match",
                        "documentId": "arxiv:1",
                        "metadata": "{}",
                        "_additional": { "id": "a", "score": "2.5" }
                    },
                    {
                        "content": "weaker match",
                        "documentId": "arxiv:2",
                        "metadata": "{}",
                        "_additional": { "id": "b", "score": "1.0" }
                    }
                ] } }
            }));
        })
        .await;

    let store = WeaviateStore::new(&weaviate_config(server.base_url())).unwrap();
    let hits = store
        .search(&StoreQuery {
            query_text: "keyword".to_string(),
            query_vector: None,
            limit: 10,
            min_score: 0.0,
            filters: None,
        })
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.lexical_fallback));
    // Rescaled relative to the top hit, bounded [0, 1].
    assert!((hits[0].score - 1.0).abs() < 1e-9);
    assert!((hits[1].score - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn test_weaviate_missing_class_is_schema_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/graphql");
            then.status(200).json_body(json!({
                "errors": [
                    { "message": "Cannot query field \"PaperChunk\" on type \"GetObjectsObj\"" }
                ]
            }));
        })
        .await;

    let store = WeaviateStore::new(&weaviate_config(server.base_url())).unwrap();
    let err = store
        .search(&StoreQuery {
            query_text: "q".to_string(),
            query_vector: Some(vec![1.0, 0.0]),
            limit: 5,
            min_score: 0.0,
            filters: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Schema(_)));
}

#[tokio::test]
async fn test_weaviate_delete_by_document() {
    let server = MockServer::start_async().await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/v1/batch/objects");
            then.status(200).json_body(json!({
                "results": { "matches": 3, "successful": 3 }
            }));
        })
        .await;

    let store = WeaviateStore::new(&weaviate_config(server.base_url())).unwrap();
    store
        .delete_by_document_id("arxiv:1706.03762")
        .await
        .unwrap();
    delete.assert_async().await;
}

#[tokio::test]
async fn test_weaviate_count_and_health() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/graphql");
            then.status(200).json_body(json!({
                "data": { "Aggregate": { "PaperChunk": [ { "meta": { "count": 42 } } ] } }
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/.well-known/ready");
            then.status(200);
        })
        .await;

    let store = WeaviateStore::new(&weaviate_config(server.base_url())).unwrap();
    assert_eq!(store.count().await, 42);
    assert!(store.health_check().await);

    // Unreachable backend: count degrades to 0, health to false.
    let unreachable = WeaviateStore::new(&weaviate_config(dead_endpoint().await)).unwrap();
    assert_eq!(unreachable.count().await, 0);
    assert!(!unreachable.health_check().await);
}
