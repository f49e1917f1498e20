//! TopologyIndex — resolves members and partitions for incoming events.
//!
//! Member lookups scan services → clusters → members under the shared
//! read lock so the caller sees one consistent snapshot. Locations are
//! resolved afresh per call; nothing is cached, since members move
//! between partitions as the fleet changes.

use std::sync::Arc;

use tracing::debug;

use crate::error::{TopologyError, TopologyResult};
use crate::registry::PartitionRegistry;
use crate::store::TopologyStore;
use crate::types::*;

/// Where a member sits inside the monitoring hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberLocation {
    pub cluster_id: ClusterId,
    pub network_partition_id: NetworkPartitionId,
    pub partition_id: PartitionId,
    pub member_id: MemberId,
}

/// Read path over the topology graph and the partition registry.
#[derive(Clone)]
pub struct TopologyIndex {
    topology: TopologyStore,
    partitions: Arc<dyn PartitionRegistry>,
}

impl TopologyIndex {
    pub fn new(topology: TopologyStore, partitions: Arc<dyn PartitionRegistry>) -> Self {
        Self {
            topology,
            partitions,
        }
    }

    /// The underlying topology store.
    pub fn topology(&self) -> &TopologyStore {
        &self.topology
    }

    /// Network partition owning `partition_id`.
    pub fn resolve_network_partition_of_partition(
        &self,
        partition_id: &str,
    ) -> TopologyResult<NetworkPartitionId> {
        self.partitions
            .network_partition_of(partition_id)?
            .ok_or_else(|| TopologyError::PartitionNotFound(partition_id.to_string()))
    }

    /// Find a member anywhere in the topology.
    ///
    /// Holds the read lock for the whole scan and returns a copy, so the
    /// lock is already released when the caller inspects the result.
    pub fn find_member(&self, member_id: &str) -> TopologyResult<Member> {
        let found = self.topology.with_read_lock(|topology| {
            topology
                .services()
                .flat_map(|service| service.clusters())
                .find_map(|cluster| cluster.member(member_id).cloned())
        })?;

        found.ok_or_else(|| TopologyError::MemberNotFound(member_id.to_string()))
    }

    /// Whether a member exists anywhere in the topology.
    pub fn member_exists(&self, member_id: &str) -> TopologyResult<bool> {
        self.topology.with_read_lock(|topology| {
            topology
                .services()
                .flat_map(|service| service.clusters())
                .any(|cluster| cluster.member_exists(member_id))
        })
    }

    /// Resolve the full cluster / network-partition / partition path of a
    /// member. The topology lock is released before the partition
    /// registry is consulted.
    pub fn locate_member(&self, member_id: &str) -> TopologyResult<MemberLocation> {
        let member = self.find_member(member_id)?;
        let network_partition_id =
            self.resolve_network_partition_of_partition(&member.partition_id)?;

        debug!(
            %member_id,
            cluster_id = %member.cluster_id,
            partition_id = %member.partition_id,
            %network_partition_id,
            "member located"
        );

        Ok(MemberLocation {
            cluster_id: member.cluster_id,
            network_partition_id,
            partition_id: member.partition_id,
            member_id: member.id,
        })
    }
}
