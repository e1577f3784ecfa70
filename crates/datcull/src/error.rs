//! Error types for the datcull library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for datcull operations.
#[derive(Debug, Error)]
pub enum DatcullError {
    /// Error reading or accessing a file.
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing the game-list document.
    #[error("Parse error in '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    /// The source document parsed but yielded no entries.
    #[error("Empty collection: {0}")]
    EmptyCollection(String),

    /// A configured criterion name has no definition.
    #[error("Unknown criterion: {0}")]
    UnknownCriterion(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider network or timeout failure. Retryable at chunk granularity.
    #[error("Provider transport error: {0}")]
    ProviderTransport(String),

    /// Provider signalled an explicit rate limit. Retryable with backoff.
    #[error("Provider rate limit: {0}")]
    ProviderRateLimit(String),

    /// Provider response did not match the expected schema. Not retryable;
    /// the affected chunk degrades to failed score sets.
    #[error("Provider format error: {0}")]
    ProviderFormat(String),

    /// An entry's score set is missing a required criterion.
    #[error("Entry '{entry}' has no score for criterion '{criterion}'")]
    IncompleteScoreSet { entry: String, criterion: String },

    /// Error saving or loading a persisted artifact.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from the XML library.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl DatcullError {
    /// Whether the batch controller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatcullError::ProviderTransport(_) | DatcullError::ProviderRateLimit(_)
        )
    }
}

/// Result type alias for datcull operations.
pub type Result<T> = std::result::Result<T, DatcullError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DatcullError::ProviderTransport("timeout".into()).is_retryable());
        assert!(DatcullError::ProviderRateLimit("429".into()).is_retryable());
        assert!(!DatcullError::ProviderFormat("bad json".into()).is_retryable());
        assert!(!DatcullError::EmptyCollection("no entries".into()).is_retryable());
        assert!(!DatcullError::UnknownCriterion("bogus".into()).is_retryable());
    }
}
