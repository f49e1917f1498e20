//! Partition registry — resolves a partition to its network partition.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::{TopologyError, TopologyResult};
use crate::types::{NetworkPartitionId, Partition};

/// Source of truth for partition placement.
///
/// Deployment-policy machinery owns the real registry; the autoscaler
/// core only asks which network partition a partition belongs to.
pub trait PartitionRegistry: Send + Sync {
    /// Network partition owning `partition_id`, or `None` if unknown.
    fn network_partition_of(
        &self,
        partition_id: &str,
    ) -> TopologyResult<Option<NetworkPartitionId>>;
}

/// In-memory partition registry.
#[derive(Default)]
pub struct PartitionMap {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of partitions. Later entries replace
    /// earlier ones with the same id.
    pub fn from_partitions(partitions: impl IntoIterator<Item = Partition>) -> Self {
        let partitions = partitions.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            partitions: RwLock::new(partitions),
        }
    }

    /// Register or replace a partition.
    pub fn register(&self, partition: Partition) -> TopologyResult<()> {
        let mut partitions = self.write()?;
        debug!(
            partition = %partition.id,
            network_partition = %partition.network_partition_id,
            "partition registered"
        );
        partitions.insert(partition.id.clone(), partition);
        Ok(())
    }

    /// Remove a partition. Returns true if it existed.
    pub fn unregister(&self, partition_id: &str) -> TopologyResult<bool> {
        Ok(self.write()?.remove(partition_id).is_some())
    }

    pub fn len(&self) -> TopologyResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> TopologyResult<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> TopologyResult<RwLockReadGuard<'_, HashMap<String, Partition>>> {
        self.partitions.read().map_err(|_| TopologyError::LockPoisoned)
    }

    fn write(&self) -> TopologyResult<RwLockWriteGuard<'_, HashMap<String, Partition>>> {
        self.partitions
            .write()
            .map_err(|_| TopologyError::LockPoisoned)
    }
}

impl PartitionRegistry for PartitionMap {
    fn network_partition_of(
        &self,
        partition_id: &str,
    ) -> TopologyResult<Option<NetworkPartitionId>> {
        Ok(self
            .read()?
            .get(partition_id)
            .map(|p| p.network_partition_id.clone()))
    }
}
