//! Seed the topology, partition registry and cluster monitors from config.

use std::sync::Arc;

use anyhow::anyhow;
use fleetscale_core::FleetConfig;
use fleetscale_health::{AutoscalerContext, ClusterMonitor};
use fleetscale_topology::{PartitionMap, TopologyIndex};
use tracing::info;

pub struct Fleet {
    pub index: TopologyIndex,
    pub context: Arc<AutoscalerContext>,
}

pub fn bootstrap(config: &FleetConfig) -> anyhow::Result<Fleet> {
    let topology = config.topology()?;
    let partitions = Arc::new(PartitionMap::from_partitions(config.partitions()));
    info!(partitions = partitions.len()?, "partition registry loaded");

    let context = Arc::new(AutoscalerContext::new());
    for service in &config.services {
        for cluster in &service.clusters {
            let policy = config
                .policy(&cluster.deployment_policy)
                .cloned()
                .ok_or_else(|| anyhow!("unknown deployment policy {}", cluster.deployment_policy))?;

            let mut monitor = ClusterMonitor::new(&cluster.id, &service.name, policy);
            for member in &cluster.members {
                monitor.add_member(&member.id, &member.partition_id);
            }
            info!(
                service = %service.name,
                cluster = %cluster.id,
                members = monitor.member_count(),
                "cluster monitor registered"
            );
            context.register_monitor(monitor)?;
        }
    }

    Ok(Fleet {
        index: TopologyIndex::new(topology, partitions),
        context,
    })
}
