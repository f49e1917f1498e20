//! Monitoring context tree — the per-cluster state the autoscaler evaluates.
//!
//! ```text
//! AutoscalerContext
//!   └── ClusterMonitor (one per registered cluster)
//!         ├── membership view: member_id → partition_id
//!         ├── DeploymentPolicy
//!         └── NetworkPartitionContext (requests in flight)
//!               └── PartitionContext
//!                     └── MemberStatsContext (load average, memory)
//! ```
//!
//! Each level exclusively owns its children. Leaf contexts and metrics
//! are materialised on first observation through get-or-insert, so a
//! given member/metric pair only ever has one instance. The dispatcher
//! is the only writer of metric state; registration and deregistration of
//! cluster monitors comes from outside and takes the same write lock.

use std::collections::HashMap;
use std::sync::RwLock;

use fleetscale_topology::{DeploymentPolicy, MemberLocation};
use tracing::{debug, info};

use crate::error::{ContextError, ContextResult};
use crate::metric::{Metric, MetricField, MetricKind};

// ── Member ────────────────────────────────────────────────────────

/// Health statistics for one member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberStatsContext {
    member_id: String,
    load_average: Option<Metric>,
    memory_consumption: Option<Metric>,
}

impl MemberStatsContext {
    pub fn new(member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            load_average: None,
            memory_consumption: None,
        }
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// The metric of `kind`, if it has been observed.
    pub fn metric(&self, kind: MetricKind) -> Option<&Metric> {
        match kind {
            MetricKind::LoadAverage => self.load_average.as_ref(),
            MetricKind::MemoryConsumption => self.memory_consumption.as_ref(),
        }
    }

    /// The metric of `kind`, allocated on first access.
    pub fn metric_or_insert(&mut self, kind: MetricKind) -> &mut Metric {
        match kind {
            MetricKind::LoadAverage => self.load_average.get_or_insert_with(Metric::default),
            MetricKind::MemoryConsumption => {
                self.memory_consumption.get_or_insert_with(Metric::default)
            }
        }
    }
}

// ── Partition ─────────────────────────────────────────────────────

/// Member statistics for one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionContext {
    partition_id: String,
    members: HashMap<String, MemberStatsContext>,
}

impl PartitionContext {
    pub fn new(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            members: HashMap::new(),
        }
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    pub fn member_stats(&self, member_id: &str) -> Option<&MemberStatsContext> {
        self.members.get(member_id)
    }

    pub fn member_stats_or_insert(&mut self, member_id: &str) -> &mut MemberStatsContext {
        self.members
            .entry(member_id.to_string())
            .or_insert_with(|| MemberStatsContext::new(member_id))
    }

    pub fn remove_member_stats(&mut self, member_id: &str) -> Option<MemberStatsContext> {
        self.members.remove(member_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

// ── Network partition ─────────────────────────────────────────────

/// Aggregate request load and partition contexts for one network partition.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkPartitionContext {
    network_partition_id: String,
    requests_in_flight: Metric,
    partitions: HashMap<String, PartitionContext>,
}

impl NetworkPartitionContext {
    pub fn new(network_partition_id: impl Into<String>) -> Self {
        Self {
            network_partition_id: network_partition_id.into(),
            requests_in_flight: Metric::default(),
            partitions: HashMap::new(),
        }
    }

    pub fn network_partition_id(&self) -> &str {
        &self.network_partition_id
    }

    pub fn requests_in_flight(&self) -> &Metric {
        &self.requests_in_flight
    }

    pub fn set_request_metric(&mut self, field: MetricField, value: f32) {
        self.requests_in_flight.set(field, value);
    }

    pub fn partition_ctxt(&self, partition_id: &str) -> Option<&PartitionContext> {
        self.partitions.get(partition_id)
    }

    pub fn partition_ctxt_or_insert(&mut self, partition_id: &str) -> &mut PartitionContext {
        self.partitions
            .entry(partition_id.to_string())
            .or_insert_with(|| PartitionContext::new(partition_id))
    }

    pub fn partitions(&self) -> impl Iterator<Item = &PartitionContext> {
        self.partitions.values()
    }
}

// ── Cluster ───────────────────────────────────────────────────────

/// Monitoring state for one registered cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMonitor {
    cluster_id: String,
    service_name: String,
    deployment_policy: DeploymentPolicy,
    /// Membership view: member_id → partition_id.
    members: HashMap<String, String>,
    network_partitions: HashMap<String, NetworkPartitionContext>,
}

impl ClusterMonitor {
    /// Create a monitor with one network-partition context per network
    /// partition the policy references, and one partition context per
    /// partition.
    pub fn new(
        cluster_id: impl Into<String>,
        service_name: impl Into<String>,
        deployment_policy: DeploymentPolicy,
    ) -> Self {
        let mut network_partitions = HashMap::new();
        for partition in &deployment_policy.partitions {
            network_partitions
                .entry(partition.network_partition_id.clone())
                .or_insert_with(|| NetworkPartitionContext::new(&partition.network_partition_id))
                .partition_ctxt_or_insert(&partition.id);
        }

        Self {
            cluster_id: cluster_id.into(),
            service_name: service_name.into(),
            deployment_policy,
            members: HashMap::new(),
            network_partitions,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn deployment_policy(&self) -> &DeploymentPolicy {
        &self.deployment_policy
    }

    /// Record a member as belonging to this cluster.
    pub fn add_member(&mut self, member_id: &str, partition_id: &str) {
        self.members
            .insert(member_id.to_string(), partition_id.to_string());
    }

    /// Drop a member from the membership view along with its statistics.
    /// Returns the partition it was placed in.
    pub fn remove_member(&mut self, member_id: &str) -> Option<String> {
        let partition_id = self.members.remove(member_id)?;
        for np in self.network_partitions.values_mut() {
            if let Some(partition) = np.partitions.get_mut(&partition_id) {
                partition.remove_member_stats(member_id);
            }
        }
        Some(partition_id)
    }

    pub fn member_exists(&self, member_id: &str) -> bool {
        self.members.contains_key(member_id)
    }

    pub fn partition_of_member(&self, member_id: &str) -> Option<&str> {
        self.members.get(member_id).map(String::as_str)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn network_partition_ctxt(
        &self,
        network_partition_id: &str,
    ) -> Option<&NetworkPartitionContext> {
        self.network_partitions.get(network_partition_id)
    }

    pub fn network_partition_ctxt_mut(
        &mut self,
        network_partition_id: &str,
    ) -> Option<&mut NetworkPartitionContext> {
        self.network_partitions.get_mut(network_partition_id)
    }

    pub fn network_partition_ctxt_or_insert(
        &mut self,
        network_partition_id: &str,
    ) -> &mut NetworkPartitionContext {
        self.network_partitions
            .entry(network_partition_id.to_string())
            .or_insert_with(|| NetworkPartitionContext::new(network_partition_id))
    }

    pub fn network_partitions(&self) -> impl Iterator<Item = &NetworkPartitionContext> {
        self.network_partitions.values()
    }
}

// ── Registry ──────────────────────────────────────────────────────

/// All cluster monitors known to the autoscaler.
#[derive(Debug, Default)]
pub struct AutoscalerContext {
    monitors: RwLock<HashMap<String, ClusterMonitor>>,
}

impl AutoscalerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a monitor, replacing any previous one for the same cluster.
    pub fn register_monitor(&self, monitor: ClusterMonitor) -> ContextResult<()> {
        let cluster_id = monitor.cluster_id.clone();
        let mut monitors = self.write()?;
        let replaced = monitors.insert(cluster_id.clone(), monitor).is_some();
        info!(%cluster_id, replaced, "cluster monitor registered");
        Ok(())
    }

    /// Remove a cluster's monitor and all its state.
    pub fn deregister_monitor(&self, cluster_id: &str) -> ContextResult<bool> {
        let existed = self.write()?.remove(cluster_id).is_some();
        if existed {
            info!(%cluster_id, "cluster monitor deregistered");
        }
        Ok(existed)
    }

    pub fn is_monitoring(&self, cluster_id: &str) -> ContextResult<bool> {
        Ok(self.read()?.contains_key(cluster_id))
    }

    /// IDs of every monitored cluster.
    pub fn monitored_clusters(&self) -> ContextResult<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    /// Run `f` against a cluster's monitor under the read lock.
    pub fn with_monitor<R>(
        &self,
        cluster_id: &str,
        f: impl FnOnce(&ClusterMonitor) -> R,
    ) -> ContextResult<R> {
        let monitors = self.read()?;
        let monitor = monitors
            .get(cluster_id)
            .ok_or_else(|| ContextError::ClusterNotMonitored(cluster_id.to_string()))?;
        Ok(f(monitor))
    }

    /// Run `f` against a cluster's monitor under the write lock.
    pub fn with_monitor_mut<R>(
        &self,
        cluster_id: &str,
        f: impl FnOnce(&mut ClusterMonitor) -> R,
    ) -> ContextResult<R> {
        let mut monitors = self.write()?;
        let monitor = monitors
            .get_mut(cluster_id)
            .ok_or_else(|| ContextError::ClusterNotMonitored(cluster_id.to_string()))?;
        Ok(f(monitor))
    }

    pub fn member_exists(&self, cluster_id: &str, member_id: &str) -> ContextResult<bool> {
        self.with_monitor(cluster_id, |m| m.member_exists(member_id))
    }

    pub fn partition_of_member(
        &self,
        cluster_id: &str,
        member_id: &str,
    ) -> ContextResult<Option<String>> {
        self.with_monitor(cluster_id, |m| {
            m.partition_of_member(member_id).map(str::to_string)
        })
    }

    pub fn deployment_policy_for(&self, cluster_id: &str) -> ContextResult<DeploymentPolicy> {
        self.with_monitor(cluster_id, |m| m.deployment_policy().clone())
    }

    /// Walk the hierarchy down to a member's metric, creating the network
    /// partition, partition, member and metric levels as needed, and hand
    /// the metric to `f`. The cluster monitor itself must be registered.
    pub fn with_member_metric<R>(
        &self,
        location: &MemberLocation,
        kind: MetricKind,
        f: impl FnOnce(&mut Metric) -> R,
    ) -> ContextResult<R> {
        self.with_monitor_mut(&location.cluster_id, |monitor| {
            let metric = monitor
                .network_partition_ctxt_or_insert(&location.network_partition_id)
                .partition_ctxt_or_insert(&location.partition_id)
                .member_stats_or_insert(&location.member_id)
                .metric_or_insert(kind);
            f(metric)
        })
    }

    /// Set one field of a member's metric. Returns the updated metric.
    pub fn set_member_metric(
        &self,
        location: &MemberLocation,
        kind: MetricKind,
        field: MetricField,
        value: f32,
    ) -> ContextResult<Metric> {
        self.with_member_metric(location, kind, |metric| {
            metric.set(field, value);
            *metric
        })
    }

    /// Set one field of a network partition's requests-in-flight metric.
    /// Both the cluster and the network partition must already be known.
    pub fn set_network_partition_request_metric(
        &self,
        cluster_id: &str,
        network_partition_id: &str,
        field: MetricField,
        value: f32,
    ) -> ContextResult<()> {
        self.with_monitor_mut(cluster_id, |monitor| -> ContextResult<()> {
            let ctxt = monitor
                .network_partition_ctxt_mut(network_partition_id)
                .ok_or_else(|| ContextError::NetworkPartitionNotFound {
                    cluster_id: cluster_id.to_string(),
                    network_partition_id: network_partition_id.to_string(),
                })?;
            ctxt.set_request_metric(field, value);
            debug!(%cluster_id, %network_partition_id, ?field, value, "requests in flight updated");
            Ok(())
        })?
    }

    /// Copy of a member's metric, if observed.
    pub fn member_metric(&self, location: &MemberLocation, kind: MetricKind) -> Option<Metric> {
        self.with_monitor(&location.cluster_id, |monitor| -> Option<Metric> {
            monitor
                .network_partition_ctxt(&location.network_partition_id)?
                .partition_ctxt(&location.partition_id)?
                .member_stats(&location.member_id)?
                .metric(kind)
                .copied()
        })
        .ok()
        .flatten()
    }

    /// Copy of a network partition's requests-in-flight metric.
    pub fn requests_in_flight(
        &self,
        cluster_id: &str,
        network_partition_id: &str,
    ) -> Option<Metric> {
        self.with_monitor(cluster_id, |monitor| {
            monitor
                .network_partition_ctxt(network_partition_id)
                .map(|np| *np.requests_in_flight())
        })
        .ok()
        .flatten()
    }

    fn read(
        &self,
    ) -> ContextResult<std::sync::RwLockReadGuard<'_, HashMap<String, ClusterMonitor>>> {
        self.monitors.read().map_err(|_| ContextError::LockPoisoned)
    }

    fn write(
        &self,
    ) -> ContextResult<std::sync::RwLockWriteGuard<'_, HashMap<String, ClusterMonitor>>> {
        self.monitors.write().map_err(|_| ContextError::LockPoisoned)
    }
}
