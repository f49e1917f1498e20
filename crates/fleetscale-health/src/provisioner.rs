//! Provisioning collaborator — terminates and spawns instances.

use fleetscale_topology::Partition;
use thiserror::Error;

/// A member could not be terminated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to terminate member {member_id}: {reason}")]
pub struct TerminationError {
    pub member_id: String,
    pub reason: String,
}

/// A replacement instance could not be spawned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to spawn instance for cluster {cluster_id} in partition {partition_id}: {reason}")]
pub struct SpawningError {
    pub cluster_id: String,
    pub partition_id: String,
    pub reason: String,
}

/// Client for the component that owns instance lifecycles.
///
/// Calls are synchronous from the dispatcher's point of view; any
/// timeout is the implementation's responsibility.
pub trait Provisioner: Send + Sync {
    /// Terminate a running member.
    fn terminate(&self, member_id: &str) -> Result<(), TerminationError>;

    /// Start a new instance for `cluster_id` inside `partition`.
    fn spawn(&self, partition: &Partition, cluster_id: &str) -> Result<(), SpawningError>;
}
