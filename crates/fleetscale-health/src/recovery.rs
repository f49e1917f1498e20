//! Fault recovery — terminate a faulty member and spawn its replacement.
//!
//! The workflow is best-effort and never fails its caller: every error
//! is logged and reflected in the returned `RecoveryOutcome`. Membership
//! and placement are read through the cluster registry before the
//! provisioner is called; no lock is held across a provisioning call.

use std::sync::Arc;

use fleetscale_topology::Partition;
use tracing::{error, info, warn};

use crate::context::AutoscalerContext;
use crate::error::ContextResult;
use crate::provisioner::{Provisioner, SpawningError, TerminationError};

/// How a member-fault signal was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// The signal did not name a member.
    MalformedSignal,
    /// No monitor is registered for the cluster.
    UnknownCluster,
    /// The member is no longer part of the cluster; nothing to do.
    AlreadyTerminated,
    /// Termination was requested but the member's partition could not be
    /// resolved through the deployment policy, so no replacement was spawned.
    PartitionUnresolved {
        partition_id: Option<String>,
        termination: Option<TerminationError>,
    },
    /// Terminated and replaced.
    Replaced { partition_id: String },
    /// At least one provisioning call failed.
    Failed {
        partition_id: String,
        termination: Option<TerminationError>,
        spawn: Option<SpawningError>,
    },
}

/// Terminate-then-respawn workflow for faulty members.
#[derive(Clone)]
pub struct FaultRecovery {
    context: Arc<AutoscalerContext>,
    provisioner: Arc<dyn Provisioner>,
}

/// What the monitor knows about a faulty member, copied out of the lock.
struct Placement {
    partition_id: Option<String>,
    partition: Option<Partition>,
}

impl FaultRecovery {
    pub fn new(context: Arc<AutoscalerContext>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            context,
            provisioner,
        }
    }

    /// Handle a `member-fault` signal.
    ///
    /// A termination failure does not stop the replacement from being
    /// requested: the faulty member is presumed gone either way.
    pub fn handle_member_fault(&self, cluster_id: &str, member_id: &str) -> RecoveryOutcome {
        if member_id.is_empty() {
            error!(%cluster_id, "member id not found in member fault event");
            return RecoveryOutcome::MalformedSignal;
        }

        let placement = match self.placement(cluster_id, member_id) {
            Ok(Some(p)) => p,
            Ok(None) => {
                info!(%cluster_id, %member_id, "member already terminated, ignoring fault");
                return RecoveryOutcome::AlreadyTerminated;
            }
            Err(e) => {
                error!(%cluster_id, %member_id, error = %e, "cannot handle member fault");
                return RecoveryOutcome::UnknownCluster;
            }
        };

        let termination = match self.provisioner.terminate(member_id) {
            Ok(()) => {
                info!(%cluster_id, %member_id, "faulty member terminated");
                None
            }
            Err(e) => {
                error!(%cluster_id, %member_id, error = %e, "faulty member termination failed");
                Some(e)
            }
        };

        let (partition_id, partition) = match placement {
            Placement {
                partition_id: Some(pid),
                partition: Some(partition),
            } => (pid, partition),
            Placement { partition_id, .. } => {
                error!(
                    %cluster_id,
                    %member_id,
                    partition_id = partition_id.as_deref().unwrap_or("<none>"),
                    "partition of faulty member not found in deployment policy, replacement skipped"
                );
                return RecoveryOutcome::PartitionUnresolved {
                    partition_id,
                    termination,
                };
            }
        };

        let spawn = match self.provisioner.spawn(&partition, cluster_id) {
            Ok(()) => {
                info!(
                    partition = %partition_id,
                    cluster = %cluster_id,
                    "instance spawned for fault member"
                );
                None
            }
            Err(e) => {
                error!(
                    %cluster_id,
                    partition = %partition_id,
                    error = %e,
                    "replacement spawn failed"
                );
                Some(e)
            }
        };

        if termination.is_none() && spawn.is_none() {
            RecoveryOutcome::Replaced { partition_id }
        } else {
            warn!(
                %cluster_id,
                %member_id,
                "member fault recovery incomplete, awaiting next fault signal"
            );
            RecoveryOutcome::Failed {
                partition_id,
                termination,
                spawn,
            }
        }
    }

    /// Membership and placement of a member, read through the cluster
    /// registry before any provisioning call. `Ok(None)` when the member
    /// is no longer part of the cluster.
    fn placement(&self, cluster_id: &str, member_id: &str) -> ContextResult<Option<Placement>> {
        if !self.context.member_exists(cluster_id, member_id)? {
            return Ok(None);
        }
        let partition_id = self.context.partition_of_member(cluster_id, member_id)?;
        let partition = match partition_id.as_deref() {
            Some(pid) => self
                .context
                .deployment_policy_for(cluster_id)?
                .partition_by_id(pid)
                .cloned(),
            None => None,
        };
        Ok(Some(Placement {
            partition_id,
            partition,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use fleetscale_topology::DeploymentPolicy;

    use crate::context::ClusterMonitor;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Terminate(String),
        Spawn { partition_id: String, cluster_id: String },
    }

    #[derive(Default)]
    struct RecordingProvisioner {
        calls: Mutex<Vec<Call>>,
        fail_terminate: bool,
        fail_spawn: bool,
    }

    impl RecordingProvisioner {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Provisioner for RecordingProvisioner {
        fn terminate(&self, member_id: &str) -> Result<(), TerminationError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Terminate(member_id.to_string()));
            if self.fail_terminate {
                return Err(TerminationError {
                    member_id: member_id.to_string(),
                    reason: "iaas timeout".to_string(),
                });
            }
            Ok(())
        }

        fn spawn(&self, partition: &Partition, cluster_id: &str) -> Result<(), SpawningError> {
            self.calls.lock().unwrap().push(Call::Spawn {
                partition_id: partition.id.clone(),
                cluster_id: cluster_id.to_string(),
            });
            if self.fail_spawn {
                return Err(SpawningError {
                    cluster_id: cluster_id.to_string(),
                    partition_id: partition.id.clone(),
                    reason: "quota exceeded".to_string(),
                });
            }
            Ok(())
        }
    }

    fn test_context() -> Arc<AutoscalerContext> {
        let policy = DeploymentPolicy {
            id: "policy-1".to_string(),
            partitions: vec![Partition {
                id: "p1".to_string(),
                network_partition_id: "np1".to_string(),
                provider: None,
                max_members: None,
            }],
        };
        let mut monitor = ClusterMonitor::new("c1", "php", policy);
        monitor.add_member("m1", "p1");
        monitor.add_member("m-stray", "p-retired");

        let ctx = Arc::new(AutoscalerContext::new());
        ctx.register_monitor(monitor).unwrap();
        ctx
    }

    fn recovery(provisioner: Arc<RecordingProvisioner>) -> FaultRecovery {
        FaultRecovery::new(test_context(), provisioner)
    }

    #[test]
    fn replaces_present_member_in_its_partition() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let outcome = recovery(provisioner.clone()).handle_member_fault("c1", "m1");

        assert_eq!(
            outcome,
            RecoveryOutcome::Replaced {
                partition_id: "p1".to_string()
            }
        );
        assert_eq!(
            provisioner.calls(),
            vec![
                Call::Terminate("m1".to_string()),
                Call::Spawn {
                    partition_id: "p1".to_string(),
                    cluster_id: "c1".to_string()
                },
            ]
        );
    }

    #[test]
    fn absent_member_is_a_no_op() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let outcome = recovery(provisioner.clone()).handle_member_fault("c1", "m-gone");

        assert_eq!(outcome, RecoveryOutcome::AlreadyTerminated);
        assert!(provisioner.calls().is_empty());
    }

    #[test]
    fn empty_member_id_is_malformed() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let outcome = recovery(provisioner.clone()).handle_member_fault("c1", "");

        assert_eq!(outcome, RecoveryOutcome::MalformedSignal);
        assert!(provisioner.calls().is_empty());
    }

    #[test]
    fn unknown_cluster_makes_no_calls() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let outcome = recovery(provisioner.clone()).handle_member_fault("c9", "m1");

        assert_eq!(outcome, RecoveryOutcome::UnknownCluster);
        assert!(provisioner.calls().is_empty());
    }

    #[test]
    fn spawn_still_attempted_after_termination_failure() {
        let provisioner = Arc::new(RecordingProvisioner {
            fail_terminate: true,
            ..Default::default()
        });
        let outcome = recovery(provisioner.clone()).handle_member_fault("c1", "m1");

        assert_eq!(provisioner.calls().len(), 2);
        assert!(matches!(provisioner.calls()[1], Call::Spawn { .. }));
        match outcome {
            RecoveryOutcome::Failed {
                termination, spawn, ..
            } => {
                assert_eq!(termination.unwrap().member_id, "m1");
                assert!(spawn.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_is_reported_not_raised() {
        let provisioner = Arc::new(RecordingProvisioner {
            fail_spawn: true,
            ..Default::default()
        });
        let outcome = recovery(provisioner.clone()).handle_member_fault("c1", "m1");

        assert!(matches!(
            outcome,
            RecoveryOutcome::Failed {
                termination: None,
                spawn: Some(_),
                ..
            }
        ));
        assert_eq!(provisioner.calls().len(), 2);
    }

    #[test]
    fn partition_outside_policy_terminates_without_spawn() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let outcome = recovery(provisioner.clone()).handle_member_fault("c1", "m-stray");

        assert_eq!(
            outcome,
            RecoveryOutcome::PartitionUnresolved {
                partition_id: Some("p-retired".to_string()),
                termination: None,
            }
        );
        assert_eq!(provisioner.calls(), vec![Call::Terminate("m-stray".to_string())]);
    }

    #[test]
    fn member_removed_from_monitor_is_a_no_op() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let recovery = recovery(provisioner.clone());
        recovery
            .context
            .with_monitor_mut("c1", |monitor| monitor.remove_member("m1"))
            .unwrap();

        assert_eq!(
            recovery.handle_member_fault("c1", "m1"),
            RecoveryOutcome::AlreadyTerminated
        );
        assert!(provisioner.calls().is_empty());
    }

    #[test]
    fn member_without_partition_is_terminated_only() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let recovery = recovery(provisioner.clone());
        let placement = recovery.placement("c1", "m-stray").unwrap().unwrap();
        assert_eq!(placement.partition_id.as_deref(), Some("p-retired"));
        assert!(placement.partition.is_none());

        let placement = recovery.placement("c1", "m1").unwrap().unwrap();
        assert_eq!(placement.partition.unwrap().network_partition_id, "np1");
        assert!(recovery.placement("c1", "m-gone").unwrap().is_none());
        assert!(recovery.placement("c9", "m1").is_err());
    }

    #[test]
    fn repeated_fault_triggers_again_while_member_listed() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let recovery = recovery(provisioner.clone());
        recovery.handle_member_fault("c1", "m1");
        recovery.handle_member_fault("c1", "m1");

        assert_eq!(provisioner.calls().len(), 4);
    }
}
