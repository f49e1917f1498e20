//! Domain types for the topology graph and placement units.
//!
//! The graph is a forest of services, each owning clusters, each owning
//! members. Partitions and deployment policies describe where members
//! of a cluster may be placed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a service.
pub type ServiceName = String;

/// Unique identifier for a cluster.
pub type ClusterId = String;

/// Unique identifier for a member (one running instance).
pub type MemberId = String;

/// Unique identifier for a partition.
pub type PartitionId = String;

/// Unique identifier for a network partition.
pub type NetworkPartitionId = String;

// ── Topology graph ────────────────────────────────────────────────

/// The whole topology: every service known to the fleet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Topology {
    pub services: HashMap<ServiceName, Service>,
}

impl Topology {
    /// Iterate over every service in the topology.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }
}

/// A service and the clusters deployed for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub name: ServiceName,
    pub clusters: HashMap<ClusterId, Cluster>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clusters: HashMap::new(),
        }
    }

    /// Iterate over every cluster of this service.
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    pub fn cluster(&self, cluster_id: &str) -> Option<&Cluster> {
        self.clusters.get(cluster_id)
    }
}

/// A deployed group of members backing one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub service_name: ServiceName,
    pub members: HashMap<MemberId, Member>,
}

impl Cluster {
    pub fn new(id: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service_name: service_name.into(),
            members: HashMap::new(),
        }
    }

    pub fn member_exists(&self, member_id: &str) -> bool {
        self.members.contains_key(member_id)
    }

    pub fn member(&self, member_id: &str) -> Option<&Member> {
        self.members.get(member_id)
    }
}

/// One running instance within a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub id: MemberId,
    pub service_name: ServiceName,
    pub cluster_id: ClusterId,
    /// Partition the member was placed into.
    pub partition_id: PartitionId,
}

impl Member {
    pub fn new(
        id: impl Into<String>,
        service_name: impl Into<String>,
        cluster_id: impl Into<String>,
        partition_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service_name: service_name.into(),
            cluster_id: cluster_id.into(),
            partition_id: partition_id.into(),
        }
    }
}

// ── Placement ─────────────────────────────────────────────────────

/// A placement unit beneath a cluster, typically one availability zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Partition {
    pub id: PartitionId,
    pub network_partition_id: NetworkPartitionId,
    /// IaaS provider the partition lives on (e.g. "ec2", "openstack").
    #[serde(default)]
    pub provider: Option<String>,
    /// Upper bound on members placed into this partition.
    #[serde(default)]
    pub max_members: Option<u32>,
}

/// The partitions a cluster is allowed to place members into.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeploymentPolicy {
    pub id: String,
    pub partitions: Vec<Partition>,
}

impl DeploymentPolicy {
    pub fn partition_by_id(&self, partition_id: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id == partition_id)
    }

    /// Distinct network partitions referenced by this policy, in
    /// declaration order.
    pub fn network_partition_ids(&self) -> Vec<NetworkPartitionId> {
        let mut ids: Vec<NetworkPartitionId> = Vec::new();
        for p in &self.partitions {
            if !ids.contains(&p.network_partition_id) {
                ids.push(p.network_partition_id.clone());
            }
        }
        ids
    }
}
