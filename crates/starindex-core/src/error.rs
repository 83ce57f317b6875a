//! Error types for the starindex pipeline.

use thiserror::Error;

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A candidate object between matched braces was not valid JSON.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Normalization error on '{field}': {reason}")]
    Normalization { field: String, reason: String },

    #[error("Failed to load catalog '{catalog}': {reason}")]
    CatalogLoad { catalog: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Stream read error: {0}")]
    StreamRead(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// Returns `true` if the error only affects a single record and the run
    /// can continue (decode and normalization defects).
    pub fn is_record_local(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Normalization { .. })
    }

    pub(crate) fn missing(field: &str) -> Self {
        Self::Normalization {
            field: field.to_string(),
            reason: "missing".into(),
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        Self::StreamRead(e.to_string())
    }
}
