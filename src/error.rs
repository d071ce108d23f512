//! Error taxonomy for the pipeline.
//!
//! Every stage catches its own failures at the item boundary and records
//! them in the ledger, so these types mostly travel as far as the record
//! for one document or one image:
//!
//! * [`PipelineError::Io`]: a file is missing or unreadable.
//! * [`LedgerError::Conflict`]: a second extraction insert for a path;
//!   resolved by the extractor, never reported as a failure.
//! * [`ProviderError`]: a vision or embedding call exhausted its retries or
//!   returned a non-retryable status. Eligible for the retry sweep.
//! * [`ValidationError`]: the model answered, but not with the JSON object
//!   we asked for. Recorded at the indexing stage, never retried on its own.
//! * [`IndexError`]: the vector store rejected a document.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger record already exists for '{path}'")]
    Conflict { path: String },

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("corrupt ledger row: {0}")]
    Decode(String),
}

impl From<LedgerError> for IndexError {
    fn from(e: LedgerError) -> Self {
        IndexError::Ledger(e.to_string())
    }
}

/// A remote model call that did not produce a usable answer.
#[derive(Debug, Clone, Error)]
#[error("{provider} request failed{}: {message}", .status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
pub struct ProviderError {
    pub provider: String,
    /// Last HTTP status seen, if the request got that far.
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == Some(429)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No JSON object found in response")]
    NoJsonFound,

    #[error("JSON parsing error: {0}")]
    Parse(String),

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("vector store rejected '{id}': {message}")]
    Store { id: String, message: String },

    #[error("ledger error: {0}")]
    Ledger(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_message_includes_status() {
        let err = ProviderError::new("groq", Some(429), "slow down");
        assert_eq!(err.to_string(), "groq request failed with status 429: slow down");
        assert!(err.is_rate_limited());

        let err = ProviderError::new("gemini", None, "connection reset");
        assert_eq!(err.to_string(), "gemini request failed: connection reset");
    }

    #[test]
    fn missing_fields_lists_names() {
        let err = ValidationError::MissingFields(vec!["title".into(), "description".into()]);
        assert_eq!(err.to_string(), "Missing required fields: title, description");
    }
}
