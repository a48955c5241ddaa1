//! Error types for the hearth aggregation engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration or running a refresh cycle.
#[derive(Error, Debug)]
pub enum HearthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("All calendar sources failed: {0}")]
    TotalFailure(String),

    #[error("Refresh cycle exceeded {0}s and was abandoned")]
    BuildTimeout(u64),
}

impl From<serde_json::Error> for HearthError {
    fn from(err: serde_json::Error) -> Self {
        HearthError::Serialization(err.to_string())
    }
}

/// Result type alias for hearth operations.
pub type HearthResult<T> = Result<T, HearthError>;

/// Why a single source contributed nothing fresh to a refresh cycle.
///
/// These never escape the merge step: the source is substituted from cache
/// or omitted, and the failure is reported in its `SourceStatus`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchFailure {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("source timed out after {0}s")]
    Timeout(u64),

    #[error("source returned HTTP {0}")]
    HttpError(u16),

    #[error("feed rejected: {0}")]
    ParseRejected(String),
}
