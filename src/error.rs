//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Callers need to tell failure classes apart programmatically: transient
//! network faults and source-reported rate limits are retryable, while
//! not-found, validation, and schema problems are not. Every public
//! operation in this crate returns [`Error`]; raw transport errors from
//! the HTTP client never cross a module boundary.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used by retry allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    RateLimited,
    NotFound,
    Validation,
    DimensionMismatch,
    Schema,
    ExternalSource,
    RetriesExhausted,
}

#[derive(Error, Debug)]
pub enum Error {
    /// Network failure, timeout, or 5xx response. Retryable.
    #[error("transient external failure: {message}")]
    Transient { message: String },

    /// The source reported a quota violation (HTTP 429). Retryable after
    /// backoff; surfaced distinctly so callers can avoid hammering.
    #[error("rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The source reports no such item. Not retryable.
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// Malformed input (empty document, bad configuration). Caller bug,
    /// not retryable.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Chunk/vector count or vector-width mismatch detected before a
    /// store write. Programming error, not retryable.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector store schema missing or incompatible.
    #[error("schema error: {0}")]
    Schema(String),

    /// Terminal failure from an external source, with the source name
    /// attached so callers can distinguish "source unavailable" from
    /// "bad query".
    #[error("{source_name} source error: {message}")]
    ExternalSource {
        source_name: String,
        message: String,
        #[source]
        cause: Option<Box<Error>>,
    },

    /// An operation failed on every attempt; wraps the last attempt's
    /// error together with the attempt count.
    #[error("operation failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn transient(message: impl Into<String>) -> Self {
        Error::Transient {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Error::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    pub fn external(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ExternalSource {
            source_name: source_name.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn external_with_cause(
        source_name: impl Into<String>,
        message: impl Into<String>,
        cause: Error,
    ) -> Self {
        Error::ExternalSource {
            source_name: source_name.into(),
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Translate an HTTP client error into the taxonomy. Timeouts and
    /// connection failures are transient; everything else from the
    /// transport layer is treated as transient too, since only a
    /// status code can prove a permanent condition.
    pub fn from_http(err: reqwest::Error) -> Self {
        Error::Transient {
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transient { .. } => ErrorKind::Transient,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Error::Schema(_) => ErrorKind::Schema,
            Error::ExternalSource { .. } => ErrorKind::ExternalSource,
            Error::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }

    /// Whether a retry can plausibly succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::RateLimited
        )
    }
}
