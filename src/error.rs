//! Error types for metagame-subsets

use thiserror::Error;

/// Errors raised by a blob store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Store is read-only: {0}")]
    ReadOnly(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide error for generation and persistence
#[derive(Error, Debug)]
pub enum SubsetError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid card key: {0}")]
    InvalidCardKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to persist archetype {archetype}: {source}")]
    Persist {
        archetype: String,
        #[source]
        source: Box<SubsetError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors surfaced to callers of the client resolver.
///
/// A filter combination that was never materialized is not an error; the
/// resolver answers it through the fallback path instead.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Timed out after {after_ms}ms fetching deck corpus for {tournament}")]
    CorpusTimeout { tournament: String, after_ms: u64 },

    #[error("Deck corpus not found for {0}")]
    CorpusNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResolveError {
    /// Whether the caller should stop trying rather than attempt another source
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResolveError::CorpusTimeout { .. })
    }
}

impl From<SubsetError> for ResolveError {
    fn from(err: SubsetError) -> Self {
        match err {
            SubsetError::Store(e) => ResolveError::Store(e),
            SubsetError::Json(e) => ResolveError::Json(e),
            other => ResolveError::InvalidRequest(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SubsetError>;
