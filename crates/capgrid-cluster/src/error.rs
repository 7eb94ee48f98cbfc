//! Cluster API error types.

use thiserror::Error;

/// Result type alias for cluster API operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors returned by [`ClusterApi`](crate::ClusterApi) implementations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("metrics unavailable for {node}: {reason}")]
    MetricsUnavailable { node: String, reason: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid cpu quantity {0:?}")]
    InvalidQuantity(String),

    #[error("client configuration error: {0}")]
    Config(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}
