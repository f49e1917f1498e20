//! Error types for the health event pipeline.

use fleetscale_topology::TopologyError;
use thiserror::Error;

/// Result type alias for monitoring context operations.
pub type ContextResult<T> = Result<T, ContextError>;

/// The payload could not be turned into an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload carries no event")]
    Empty,

    #[error("payload carries {0} events, expected exactly one")]
    MultipleEvents(usize),

    #[error("{event}: property {property:?} given more than once")]
    DuplicateProperty { event: String, property: String },
}

/// The event was decoded but its properties do not fit its kind.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EventError {
    #[error("{event}: missing property {property:?}")]
    MissingProperty { event: String, property: &'static str },

    #[error("{event}: {property}={value:?} is not a number")]
    InvalidValue {
        event: String,
        property: &'static str,
        value: String,
    },
}

/// The monitoring context tree could not satisfy a lookup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("cluster is not monitored: {0}")]
    ClusterNotMonitored(String),

    #[error("network partition {network_partition_id} is not known to cluster {cluster_id}")]
    NetworkPartitionNotFound {
        cluster_id: String,
        network_partition_id: String,
    },

    #[error("monitoring context lock poisoned")]
    LockPoisoned,
}

/// Anything that can abort the processing of one inbound message.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("lookup failed: {0}")]
    Topology(#[from] TopologyError),

    #[error("lookup failed: {0}")]
    Context(#[from] ContextError),

    #[error("dispatch panicked: {0}")]
    Panicked(String),
}
