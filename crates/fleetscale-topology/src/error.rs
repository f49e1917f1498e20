//! Error types for topology lookups.

use thiserror::Error;

/// Result type alias for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors that can occur while reading or mutating the topology.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("member not found: {0}")]
    MemberNotFound(String),

    #[error("partition not found: {0}")]
    PartitionNotFound(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("topology lock poisoned")]
    LockPoisoned,
}
