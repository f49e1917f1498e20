//! Provisioner that only logs what it would do.

use fleetscale_health::{Provisioner, SpawningError, TerminationError};
use fleetscale_topology::Partition;
use tracing::info;

pub struct DryRunProvisioner;

impl Provisioner for DryRunProvisioner {
    fn terminate(&self, member_id: &str) -> Result<(), TerminationError> {
        info!(member = %member_id, "dry run: terminate member");
        Ok(())
    }

    fn spawn(&self, partition: &Partition, cluster_id: &str) -> Result<(), SpawningError> {
        info!(
            cluster = %cluster_id,
            partition = %partition.id,
            network_partition = %partition.network_partition_id,
            provider = partition.provider.as_deref().unwrap_or("-"),
            "dry run: spawn instance"
        );
        Ok(())
    }
}
