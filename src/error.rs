//! Error types for the rating core
//!
//! Library code returns [`ReaderError`] through the crate-wide [`Result`]
//! alias. Judge calls have their own [`JudgeError`] so callers can tell a
//! skipped comparison apart from a storage failure.

use crate::types::{ArticleId, GenerationId};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single call to the LLM judge
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JudgeError {
    /// Network failure, non-success status or timeout
    #[error("Judge unavailable: {0}")]
    Unavailable(String),

    /// Reply did not match the expected schema
    #[error("Judge returned a malformed response: {0}")]
    MalformedResponse(String),
}

impl JudgeError {
    pub fn timed_out(after: Duration) -> Self {
        JudgeError::Unavailable(format!("timed out after {:?}", after))
    }
}

impl From<reqwest::Error> for JudgeError {
    fn from(err: reqwest::Error) -> Self {
        JudgeError::Unavailable(err.to_string())
    }
}

/// Main error type for rating operations
#[derive(Error, Debug)]
pub enum ReaderError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Article not found: {0}")]
    ArticleNotFound(ArticleId),

    #[error("Generation not found: {0}")]
    GenerationNotFound(GenerationId),

    /// No generation has been seeded yet
    #[error("No active generation")]
    NoActiveGeneration,

    /// Stored ratings moved underneath a comparison
    #[error("Concurrent rating mutation: {0}")]
    ConcurrentMutation(String),

    /// Refinement cycle stopped before committing anything
    #[error("Refinement aborted: {0}")]
    RefinementAborted(String),

    #[error(transparent)]
    Judge(#[from] JudgeError),

    /// Input rejected before touching storage
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for rating operations
pub type Result<T> = std::result::Result<T, ReaderError>;

impl From<libsql::Error> for ReaderError {
    fn from(err: libsql::Error) -> Self {
        ReaderError::Database(err.to_string())
    }
}

/// Convert anyhow::Error to ReaderError
impl From<anyhow::Error> for ReaderError {
    fn from(err: anyhow::Error) -> Self {
        ReaderError::Other(err.to_string())
    }
}
