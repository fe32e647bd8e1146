//! Error types for the connection manager.

use shardline_meta::MetaError;
use thiserror::Error;

/// Result type alias for connection manager operations.
pub type ConnResult<T> = Result<T, ConnError>;

/// Errors that can occur while managing cluster connections.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("storage is not a transactional store")]
    NotTransactional,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cluster is incompatible: {0}")]
    ClusterIncompatible(String),

    #[error("cluster is not healthy: {0}")]
    ClusterUnhealthy(String),

    #[error("cannot use a cluster with active auxiliary members (member {member_id} at {address})")]
    MemberRoleRejected { member_id: u64, address: String },

    #[error("{context}")]
    Metadata {
        context: String,
        #[source]
        source: MetaError,
    },

    #[error("failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },

    #[error("failed to resolve domain")]
    Domain(#[source] anyhow::Error),

    #[error("connection manager is closed")]
    Closed,
}

impl ConnError {
    /// Wrap a metadata error with what the caller was doing.
    pub fn metadata(context: impl Into<String>, source: MetaError) -> Self {
        ConnError::Metadata {
            context: context.into(),
            source,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// A member the metadata service does not know, or a closed metadata
    /// client, will not change between attempts.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnError::Dial { .. } => true,
            ConnError::Metadata { source, .. } => {
                !matches!(source, MetaError::MemberNotFound(_) | MetaError::Closed)
            }
            _ => false,
        }
    }
}
