//! fleetscale.toml configuration parser.
//!
//! Describes the fleet the daemon starts with: network partitions,
//! deployment policies, and the services, clusters and members placed
//! under them.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use fleetscale_topology::{
    Cluster, DeploymentPolicy, Member, Partition, TopologyResult, TopologyStore,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub network_partitions: Vec<NetworkPartitionConfig>,
    #[serde(default)]
    pub deployment_policies: Vec<DeploymentPolicy>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Undelivered health events held before publishers wait.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPartitionConfig {
    pub id: String,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub id: String,
    /// Id of the deployment policy governing placement.
    pub deployment_policy: String,
    #[serde(default)]
    pub members: Vec<MemberConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: String,
    pub partition_id: String,
}

/// A config that parses but describes an inconsistent fleet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("duplicate network partition: {0}")]
    DuplicateNetworkPartition(String),

    #[error("duplicate deployment policy: {0}")]
    DuplicatePolicy(String),

    #[error("partition {partition} in policy {policy} references unknown network partition {network_partition}")]
    UnknownNetworkPartition {
        policy: String,
        partition: String,
        network_partition: String,
    },

    #[error("partition {partition} is declared with conflicting network partitions")]
    ConflictingPartition { partition: String },

    #[error("duplicate cluster: {0}")]
    DuplicateCluster(String),

    #[error("cluster {cluster} references unknown deployment policy {policy}")]
    UnknownPolicy { cluster: String, policy: String },

    #[error("duplicate member: {0}")]
    DuplicateMember(String),

    #[error("member {member} of cluster {cluster} is placed in partition {partition}, which is not in policy {policy}")]
    PartitionNotInPolicy {
        cluster: String,
        member: String,
        partition: String,
        policy: String,
    },
}

impl FromStr for FleetConfig {
    type Err = anyhow::Error;

    /// Parse and validate a config document.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let config: FleetConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        content
            .parse()
            .with_context(|| format!("Invalid fleet config {}", path.display()))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross references between sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        let mut network_partitions = HashSet::new();
        for np in &self.network_partitions {
            if !network_partitions.insert(np.id.as_str()) {
                return Err(ConfigError::DuplicateNetworkPartition(np.id.clone()));
            }
        }

        let mut policies = HashSet::new();
        let mut seen_partitions: Vec<&Partition> = Vec::new();
        for policy in &self.deployment_policies {
            if !policies.insert(policy.id.as_str()) {
                return Err(ConfigError::DuplicatePolicy(policy.id.clone()));
            }
            for partition in &policy.partitions {
                if !network_partitions.contains(partition.network_partition_id.as_str()) {
                    return Err(ConfigError::UnknownNetworkPartition {
                        policy: policy.id.clone(),
                        partition: partition.id.clone(),
                        network_partition: partition.network_partition_id.clone(),
                    });
                }
                // The same partition may appear in several policies, but it
                // must always map to one network partition.
                if seen_partitions.iter().any(|p| {
                    p.id == partition.id && p.network_partition_id != partition.network_partition_id
                }) {
                    return Err(ConfigError::ConflictingPartition {
                        partition: partition.id.clone(),
                    });
                }
                seen_partitions.push(partition);
            }
        }

        let mut clusters = HashSet::new();
        let mut members = HashSet::new();
        for cluster in self.services.iter().flat_map(|s| &s.clusters) {
            if !clusters.insert(cluster.id.as_str()) {
                return Err(ConfigError::DuplicateCluster(cluster.id.clone()));
            }
            let policy = self.policy(&cluster.deployment_policy).ok_or_else(|| {
                ConfigError::UnknownPolicy {
                    cluster: cluster.id.clone(),
                    policy: cluster.deployment_policy.clone(),
                }
            })?;
            for member in &cluster.members {
                if !members.insert(member.id.as_str()) {
                    return Err(ConfigError::DuplicateMember(member.id.clone()));
                }
                if policy.partition_by_id(&member.partition_id).is_none() {
                    return Err(ConfigError::PartitionNotInPolicy {
                        cluster: cluster.id.clone(),
                        member: member.id.clone(),
                        partition: member.partition_id.clone(),
                        policy: policy.id.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn policy(&self, id: &str) -> Option<&DeploymentPolicy> {
        self.deployment_policies.iter().find(|p| p.id == id)
    }

    /// Every partition declared by any policy, first declaration wins.
    pub fn partitions(&self) -> Vec<Partition> {
        let mut out: Vec<Partition> = Vec::new();
        for partition in self.deployment_policies.iter().flat_map(|p| &p.partitions) {
            if !out.iter().any(|p| p.id == partition.id) {
                out.push(partition.clone());
            }
        }
        out
    }

    /// Build the initial topology graph from the services section.
    pub fn topology(&self) -> TopologyResult<TopologyStore> {
        let store = TopologyStore::new();
        for service in &self.services {
            store.add_service(&service.name)?;
            for cluster in &service.clusters {
                store.add_cluster(Cluster::new(&cluster.id, &service.name))?;
                for member in &cluster.members {
                    store.add_member(Member::new(
                        &member.id,
                        &service.name,
                        &cluster.id,
                        &member.partition_id,
                    ))?;
                }
            }
        }
        Ok(store)
    }

    /// Scaffold a minimal single-zone fleet.
    pub fn scaffold() -> Self {
        FleetConfig {
            queue: QueueConfig::default(),
            logging: LoggingConfig {
                filter: Some("info,fleetscale=debug".to_string()),
            },
            network_partitions: vec![NetworkPartitionConfig {
                id: "np1".to_string(),
                provider: Some("ec2".to_string()),
            }],
            deployment_policies: vec![DeploymentPolicy {
                id: "default".to_string(),
                partitions: vec![Partition {
                    id: "p1".to_string(),
                    network_partition_id: "np1".to_string(),
                    provider: Some("ec2".to_string()),
                    max_members: Some(5),
                }],
            }],
            services: vec![ServiceConfig {
                name: "web".to_string(),
                clusters: vec![ClusterConfig {
                    id: "web-1".to_string(),
                    deployment_policy: "default".to_string(),
                    members: vec![MemberConfig {
                        id: "web-1-m1".to_string(),
                        partition_id: "p1".to_string(),
                    }],
                }],
            }],
        }
    }
}
