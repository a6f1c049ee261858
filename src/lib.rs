//! # Paper Harness
//!
//! A resilient research-paper ingestion and retrieval pipeline for AI tools.
//!
//! Paper Harness fetches papers from rate-limited academic APIs (arXiv,
//! Semantic Scholar), normalizes them into a canonical document shape,
//! splits them into overlapping chunks, embeds and stores them in a
//! vector index, and answers natural-language queries with ranked,
//! score-normalized context ready for a downstream generator.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Connectors  │──▶│   Pipeline   │──▶│ VectorStore │
//! │ arXiv / S2   │   │ Chunk+Embed  │   │ Weaviate /  │
//! │ (throttled)  │   │              │   │ in-memory   │
//! └──────────────┘   └──────────────┘   └──────┬──────┘
//!                                              │
//!                                              ▼
//!                                     ranked RetrievedContext
//! ```
//!
//! Every connector call passes through a token-bucket rate limiter and
//! a retry executor with exponential backoff, so quota-constrained
//! sources are never hammered and transient faults heal themselves.
//! All components are constructed explicitly and passed to their
//! consumers; tests substitute fakes at every seam.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Core data types |
//! | [`rate_limit`] | Token-bucket rate limiter |
//! | [`retry`] | Retry with exponential backoff |
//! | [`connector`] | Connector trait and shared resilience path |
//! | [`connector_arxiv`] | arXiv connector |
//! | [`connector_s2`] | Semantic Scholar connector |
//! | [`chunker`] | Sentence-accumulation text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store abstraction and score contract |
//! | [`store_weaviate`] | Weaviate backend |
//! | [`store_memory`] | In-memory backend |
//! | [`pipeline`] | Index and query orchestration |
//! | [`ingest`] | Multi-source ingestion fan-out |

pub mod chunker;
pub mod config;
pub mod connector;
pub mod connector_arxiv;
pub mod connector_s2;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod retry;
pub mod store;
pub mod store_memory;
pub mod store_weaviate;
