//! Error types for fleet-sync.

use thiserror::Error;

/// Errors that can occur while syncing the fleet.
#[derive(Debug, Error)]
pub enum FleetError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Relational store error
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// HTTP client error from an authority adapter
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A DNS authority rejected a request
    #[error("{authority} authority error: {message}")]
    Authority {
        authority: &'static str,
        message: String,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A uuid column failed to parse
    #[error("invalid uuid: {0}")]
    Identity(#[from] uuid::Error),

    /// A row column had an unexpected shape
    #[error("malformed row: {0}")]
    Row(String),
}

impl FleetError {
    pub(crate) fn authority(authority: &'static str, message: impl Into<String>) -> Self {
        FleetError::Authority {
            authority,
            message: message.into(),
        }
    }
}
