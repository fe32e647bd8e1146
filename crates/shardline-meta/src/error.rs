//! Error types for the metadata client.

use thiserror::Error;

/// Result type alias for metadata operations.
pub type MetaResult<T> = Result<T, MetaError>;

/// Errors that can occur while talking to the metadata service.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("no metadata endpoint reachable (tried {tried:?}): {reason}")]
    Unreachable { tried: Vec<String>, reason: String },

    #[error("invalid metadata address {0}")]
    InvalidAddress(String),

    #[error("metadata rpc {method} failed")]
    Rpc {
        method: &'static str,
        #[source]
        source: tonic::Status,
    },

    #[error("member {0} not found")]
    MemberNotFound(u64),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("metadata client is closed")]
    Closed,
}
