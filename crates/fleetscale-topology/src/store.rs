//! TopologyStore — the shared, lock-guarded topology graph.
//!
//! Topology feeds mutate the graph under the write lock; the autoscaler
//! core only ever takes the read side. Guards are scoped to a closure so
//! the lock is released on every exit path, including early returns and
//! unwinding.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{TopologyError, TopologyResult};
use crate::types::*;

/// Thread-safe handle to the topology graph.
#[derive(Clone, Default)]
pub struct TopologyStore {
    inner: Arc<RwLock<Topology>>,
}

impl TopologyStore {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the shared read lock.
    pub fn with_read_lock<R>(&self, f: impl FnOnce(&Topology) -> R) -> TopologyResult<R> {
        let guard = self.inner.read().map_err(|_| TopologyError::LockPoisoned)?;
        Ok(f(&guard))
    }

    /// Run `f` while holding the exclusive write lock.
    pub fn with_write_lock<R>(&self, f: impl FnOnce(&mut Topology) -> R) -> TopologyResult<R> {
        let mut guard = self.inner.write().map_err(|_| TopologyError::LockPoisoned)?;
        Ok(f(&mut guard))
    }

    // ── Mutation (topology feeds) ──────────────────────────────────

    /// Insert a service. An existing service with the same name is kept.
    pub fn add_service(&self, name: &str) -> TopologyResult<()> {
        self.with_write_lock(|topology| {
            topology
                .services
                .entry(name.to_string())
                .or_insert_with(|| Service::new(name));
        })?;
        debug!(service = %name, "service added to topology");
        Ok(())
    }

    /// Insert or replace a cluster under an existing service.
    pub fn add_cluster(&self, cluster: Cluster) -> TopologyResult<()> {
        let cluster_id = cluster.id.clone();
        self.with_write_lock(|topology| -> TopologyResult<()> {
            let service = topology
                .services
                .get_mut(&cluster.service_name)
                .ok_or_else(|| TopologyError::ServiceNotFound(cluster.service_name.clone()))?;
            service.clusters.insert(cluster.id.clone(), cluster);
            Ok(())
        })??;
        debug!(%cluster_id, "cluster added to topology");
        Ok(())
    }

    /// Insert or replace a member under an existing cluster.
    pub fn add_member(&self, member: Member) -> TopologyResult<()> {
        let member_id = member.id.clone();
        self.with_write_lock(|topology| -> TopologyResult<()> {
            let cluster = topology
                .services
                .get_mut(&member.service_name)
                .ok_or_else(|| TopologyError::ServiceNotFound(member.service_name.clone()))?
                .clusters
                .get_mut(&member.cluster_id)
                .ok_or_else(|| TopologyError::ClusterNotFound(member.cluster_id.clone()))?;
            cluster.members.insert(member.id.clone(), member);
            Ok(())
        })??;
        debug!(%member_id, "member added to topology");
        Ok(())
    }

    /// Remove a member wherever it lives. Returns true if it existed.
    pub fn remove_member(&self, member_id: &str) -> TopologyResult<bool> {
        let existed = self.with_write_lock(|topology| {
            topology
                .services
                .values_mut()
                .flat_map(|s| s.clusters.values_mut())
                .any(|c| c.members.remove(member_id).is_some())
        })?;
        debug!(%member_id, existed, "member removed from topology");
        Ok(existed)
    }

    /// Copy of the current topology.
    pub fn snapshot(&self) -> TopologyResult<Topology> {
        self.with_read_lock(Topology::clone)
    }
}
