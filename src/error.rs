//! Error types for the Marginalia reading core
//!
//! Structured error definitions use thiserror; anyhow errors from the binary
//! layer fold into [`MarginaliaError::Other`].
//!
//! Annotation matching and segmentation never surface per-item failures
//! through this type. They report outcomes and log instead, so one bad
//! annotation cannot abort the rest of a batch.

use thiserror::Error;

use crate::document::NodeId;

/// Main error type for Marginalia operations
#[derive(Error, Debug)]
pub enum MarginaliaError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse failure
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Document node was removed or never existed
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Structural operation not allowed on this node
    #[error("Invalid document operation: {0}")]
    InvalidOperation(String),

    /// Markdown grammar could not be loaded or parsing was cancelled
    #[error("Markdown error: {0}")]
    Markdown(String),

    /// Server answered with a non-success status
    #[error("HTTP {status}: {reason}")]
    HttpStatus { status: u16, reason: String },

    /// Stream transport failed after the connection was established
    #[error("Stream error: {0}")]
    Stream(String),

    /// Notification channel gave up or could not be built
    #[error("Notification channel error: {0}")]
    Notification(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Marginalia operations
pub type Result<T> = std::result::Result<T, MarginaliaError>;

/// Convert anyhow::Error to MarginaliaError
impl From<anyhow::Error> for MarginaliaError {
    fn from(err: anyhow::Error) -> Self {
        MarginaliaError::Other(err.to_string())
    }
}
