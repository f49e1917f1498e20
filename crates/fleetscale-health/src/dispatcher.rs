//! Health event dispatcher — the long-running consumer loop.
//!
//! Pulls one payload at a time from the inbound queue, decodes it, and
//! routes it to exactly one update:
//!
//! | Event | Target |
//! |---|---|
//! | `*-requests-in-flight` | network partition of `partition_id` in `cluster_id` |
//! | `*-load-average` | member's load average |
//! | `*-memory-consumption` | member's memory consumption |
//! | `member-fault` | `FaultRecovery` |
//!
//! Messages are handled strictly in arrival order. Each one runs on the
//! blocking pool and is awaited before the next is pulled, so a panic in
//! a collaborator is contained to that message and provisioning calls
//! never stall the async workers.

use std::sync::Arc;

use fleetscale_topology::{TopologyError, TopologyIndex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::context::AutoscalerContext;
use crate::error::DispatchError;
use crate::event::{HealthEvent, RawEvent};
use crate::provisioner::Provisioner;
use crate::queue::HealthEventReceiver;
use crate::recovery::{FaultRecovery, RecoveryOutcome};

/// What happened to one successfully processed message.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A metric field was updated.
    Applied,
    /// The event name is not one this pipeline handles.
    Ignored { event: String },
    /// A member-fault signal went through the recovery workflow.
    Recovered(RecoveryOutcome),
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub applied: u64,
    pub ignored: u64,
    pub dropped: u64,
    pub faults_handled: u64,
}

/// Routes decoded health events into the monitoring context tree.
#[derive(Clone)]
pub struct HealthEventDispatcher {
    index: TopologyIndex,
    context: Arc<AutoscalerContext>,
    recovery: FaultRecovery,
}

impl HealthEventDispatcher {
    pub fn new(
        index: TopologyIndex,
        context: Arc<AutoscalerContext>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let recovery = FaultRecovery::new(context.clone(), provisioner);
        Self {
            index,
            context,
            recovery,
        }
    }

    /// The monitoring context tree this dispatcher writes to.
    pub fn context(&self) -> &Arc<AutoscalerContext> {
        &self.context
    }

    /// Decode and apply one payload.
    pub fn dispatch(&self, payload: &str) -> Result<DispatchOutcome, DispatchError> {
        debug!(message = %payload, "health event message received");

        let raw = RawEvent::decode(payload)?;
        info!(event_name = %raw.name, "health event received");

        match HealthEvent::from_raw(&raw)? {
            Some(event) => self.apply(event),
            None => {
                debug!(event_name = %raw.name, "unhandled health event ignored");
                Ok(DispatchOutcome::Ignored { event: raw.name })
            }
        }
    }

    /// Apply an already-typed event.
    pub fn apply(&self, event: HealthEvent) -> Result<DispatchOutcome, DispatchError> {
        match event {
            HealthEvent::RequestsInFlight {
                cluster_id,
                partition_id,
                field,
                value,
            } => {
                let network_partition_id = self
                    .index
                    .resolve_network_partition_of_partition(&partition_id)?;
                self.context.set_network_partition_request_metric(
                    &cluster_id,
                    &network_partition_id,
                    field,
                    value,
                )?;
                debug!(
                    cluster = %cluster_id,
                    partition = %partition_id,
                    network_partition = %network_partition_id,
                    ?field,
                    value,
                    "requests in flight applied"
                );
                Ok(DispatchOutcome::Applied)
            }
            HealthEvent::MemberMetric {
                member_id,
                kind,
                field,
                value,
            } => {
                let location = self.index.locate_member(&member_id)?;
                let metric = self.context.set_member_metric(&location, kind, field, value)?;
                debug!(
                    member = %member_id,
                    cluster = %location.cluster_id,
                    ?kind,
                    ?field,
                    value,
                    ?metric,
                    "member metric applied"
                );
                Ok(DispatchOutcome::Applied)
            }
            HealthEvent::MemberFault {
                cluster_id,
                member_id,
            } => Ok(DispatchOutcome::Recovered(
                self.recovery.handle_member_fault(&cluster_id, &member_id),
            )),
        }
    }

    /// Run the consumer loop until `shutdown` flips to true or every
    /// publisher has gone away.
    ///
    /// A message that is already being handled completes before the
    /// shutdown signal is observed. If the shutdown sender is dropped
    /// without signalling, the loop keeps draining until the queue closes.
    pub async fn run(
        &self,
        mut receiver: HealthEventReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> DispatchStats {
        info!("health event dispatcher started");
        let mut stats = DispatchStats::default();
        let mut watching = true;

        loop {
            if *shutdown.borrow() {
                info!("health event dispatcher shutting down");
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed(), if watching => {
                    if changed.is_err() {
                        warn!("shutdown sender dropped, running until the queue closes");
                        watching = false;
                    }
                }
                message = receiver.take() => match message {
                    Some(payload) => self.process(payload, &mut stats).await,
                    None => {
                        info!("health event queue closed");
                        break;
                    }
                },
            }
        }

        info!(
            received = stats.received,
            applied = stats.applied,
            ignored = stats.ignored,
            dropped = stats.dropped,
            faults_handled = stats.faults_handled,
            "health event dispatcher stopped"
        );
        stats
    }

    /// Handle one message in isolation. Never fails.
    async fn process(&self, payload: String, stats: &mut DispatchStats) {
        stats.received += 1;

        let dispatcher = self.clone();
        let result = tokio::task::spawn_blocking(move || dispatcher.dispatch(&payload))
            .await
            .unwrap_or_else(|e| Err(DispatchError::Panicked(e.to_string())));

        match result {
            Ok(DispatchOutcome::Applied) => stats.applied += 1,
            Ok(DispatchOutcome::Ignored { .. }) => stats.ignored += 1,
            Ok(DispatchOutcome::Recovered(_)) => stats.faults_handled += 1,
            Err(e) => {
                stats.dropped += 1;
                log_dropped(&e);
            }
        }
    }
}

fn log_dropped(e: &DispatchError) {
    match e {
        DispatchError::Topology(TopologyError::MemberNotFound(member_id)) => {
            error!(member = %member_id, "member not found, health event dropped");
        }
        DispatchError::Topology(_) | DispatchError::Context(_) => {
            error!(error = %e, "health event dropped");
        }
        DispatchError::Decode(_) | DispatchError::Event(_) => {
            warn!(error = %e, "failed to process health event message");
        }
        DispatchError::Panicked(_) => {
            error!(error = %e, "health event handler panicked, continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use fleetscale_topology::{
        Cluster, DeploymentPolicy, Member, MemberLocation, Partition, PartitionMap, TopologyStore,
    };

    use crate::context::ClusterMonitor;
    use crate::error::{ContextError, DecodeError, EventError};
    use crate::metric::{Metric, MetricField, MetricKind};
    use crate::provisioner::{SpawningError, TerminationError};
    use crate::queue::HealthEventQueue;

    #[derive(Default)]
    struct RecordingProvisioner {
        calls: Mutex<Vec<String>>,
        panic_on_terminate: bool,
    }

    impl Provisioner for RecordingProvisioner {
        fn terminate(&self, member_id: &str) -> Result<(), TerminationError> {
            if self.panic_on_terminate {
                panic!("provisioner crashed");
            }
            self.calls.lock().unwrap().push(format!("terminate:{member_id}"));
            Ok(())
        }

        fn spawn(&self, partition: &Partition, cluster_id: &str) -> Result<(), SpawningError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("spawn:{}:{cluster_id}", partition.id));
            Ok(())
        }
    }

    fn partition(id: &str, np: &str) -> Partition {
        Partition {
            id: id.to_string(),
            network_partition_id: np.to_string(),
            provider: None,
            max_members: None,
        }
    }

    fn test_dispatcher(provisioner: Arc<RecordingProvisioner>) -> HealthEventDispatcher {
        let topology = TopologyStore::new();
        topology.add_service("php").unwrap();
        topology.add_cluster(Cluster::new("c1", "php")).unwrap();
        topology.add_member(Member::new("m1", "php", "c1", "p1")).unwrap();
        topology.add_member(Member::new("m2", "php", "c1", "p1")).unwrap();

        let partitions = Arc::new(PartitionMap::from_partitions([partition("p1", "np1")]));
        let index = TopologyIndex::new(topology, partitions);

        let policy = DeploymentPolicy {
            id: "policy-1".to_string(),
            partitions: vec![partition("p1", "np1")],
        };
        let mut monitor = ClusterMonitor::new("c1", "php", policy);
        monitor.add_member("m1", "p1");
        monitor.add_member("m2", "p1");
        let context = Arc::new(AutoscalerContext::new());
        context.register_monitor(monitor).unwrap();

        HealthEventDispatcher::new(index, context, provisioner)
    }

    fn location(member: &str) -> MemberLocation {
        MemberLocation {
            cluster_id: "c1".to_string(),
            network_partition_id: "np1".to_string(),
            partition_id: "p1".to_string(),
            member_id: member.to_string(),
        }
    }

    fn member_event(name: &str, member: &str, value: &str) -> String {
        format!(r#"{{"{name}": {{"member_id": "{member}", "value": "{value}"}}}}"#)
    }

    fn rif_event(name: &str, value: &str) -> String {
        format!(r#"{{"{name}": {{"cluster_id": "c1", "partition_id": "p1", "value": "{value}"}}}}"#)
    }

    #[test]
    fn load_average_example() {
        let dispatcher = test_dispatcher(Arc::default());
        let outcome = dispatcher
            .dispatch(r#"{"avg-load-average": {"member_id": "m1", "value": "3.5"}}"#)
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Applied);
        let load = dispatcher
            .context()
            .member_metric(&location("m1"), MetricKind::LoadAverage)
            .unwrap();
        assert_eq!(
            load,
            Metric {
                average: 3.5,
                gradient: 0.0,
                second_derivative: 0.0
            }
        );
        assert!(dispatcher
            .context()
            .member_metric(&location("m1"), MetricKind::MemoryConsumption)
            .is_none());
    }

    #[test]
    fn each_member_event_updates_exactly_one_field() {
        let cases = [
            ("avg-load-average", MetricKind::LoadAverage, MetricField::Average),
            ("gradient-load-average", MetricKind::LoadAverage, MetricField::Gradient),
            (
                "second-derivative-load-average",
                MetricKind::LoadAverage,
                MetricField::SecondDerivative,
            ),
            ("avg-memory-consumption", MetricKind::MemoryConsumption, MetricField::Average),
            (
                "gradient-memory-consumption",
                MetricKind::MemoryConsumption,
                MetricField::Gradient,
            ),
            (
                "second-derivative-memory-consumption",
                MetricKind::MemoryConsumption,
                MetricField::SecondDerivative,
            ),
        ];

        for (name, kind, field) in cases {
            let dispatcher = test_dispatcher(Arc::default());
            let seed = Metric {
                average: 1.0,
                gradient: 2.0,
                second_derivative: 3.0,
            };
            dispatcher
                .context()
                .with_member_metric(&location("m1"), kind, |m| *m = seed)
                .unwrap();

            dispatcher.dispatch(&member_event(name, "m1", "9.5")).unwrap();

            let metric = dispatcher.context().member_metric(&location("m1"), kind).unwrap();
            for other in MetricField::ALL {
                let expected = if other == field { 9.5 } else { seed.get(other) };
                assert_eq!(metric.get(other), expected, "{name} touched {other:?}");
            }
        }
    }

    #[test]
    fn each_requests_in_flight_event_updates_exactly_one_field() {
        let cases = [
            ("avg-requests-in-flight", MetricField::Average),
            ("gradient-requests-in-flight", MetricField::Gradient),
            ("second-derivative-requests-in-flight", MetricField::SecondDerivative),
        ];

        for (name, field) in cases {
            let dispatcher = test_dispatcher(Arc::default());
            dispatcher.dispatch(&rif_event(name, "12")).unwrap();

            let rif = dispatcher.context().requests_in_flight("c1", "np1").unwrap();
            for other in MetricField::ALL {
                let expected = if other == field { 12.0 } else { 0.0 };
                assert_eq!(rif.get(other), expected, "{name} touched {other:?}");
            }
        }
    }

    #[test]
    fn later_event_wins_per_field() {
        let dispatcher = test_dispatcher(Arc::default());
        dispatcher.dispatch(&member_event("gradient-memory-consumption", "m2", "0.5")).unwrap();
        dispatcher.dispatch(&member_event("avg-memory-consumption", "m2", "60")).unwrap();
        dispatcher.dispatch(&member_event("gradient-memory-consumption", "m2", "-0.75")).unwrap();

        let metric = dispatcher
            .context()
            .member_metric(&location("m2"), MetricKind::MemoryConsumption)
            .unwrap();
        assert_eq!(metric.average, 60.0);
        assert_eq!(metric.gradient, -0.75);
    }

    #[test]
    fn unknown_member_is_dropped() {
        let dispatcher = test_dispatcher(Arc::default());
        let err = dispatcher
            .dispatch(&member_event("avg-load-average", "ghost", "1"))
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Topology(TopologyError::MemberNotFound(ref m)) if m == "ghost"
        ));
    }

    #[test]
    fn unknown_partition_is_dropped() {
        let dispatcher = test_dispatcher(Arc::default());
        let payload = r#"{"avg-requests-in-flight": {"cluster_id": "c1", "partition_id": "p9", "value": "1"}}"#;
        let err = dispatcher.dispatch(payload).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Topology(TopologyError::PartitionNotFound(_))
        ));
    }

    #[test]
    fn unknown_cluster_is_dropped() {
        let dispatcher = test_dispatcher(Arc::default());
        let payload = r#"{"avg-requests-in-flight": {"cluster_id": "c9", "partition_id": "p1", "value": "1"}}"#;
        let err = dispatcher.dispatch(payload).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Context(ContextError::ClusterNotMonitored(_))
        ));
    }

    #[test]
    fn malformed_payloads_leave_state_untouched() {
        let dispatcher = test_dispatcher(Arc::default());
        let payloads = [
            "not-json",
            r#"{"avg-load-average": {"member_id": {"nested": "m1"}, "value": "1"}}"#,
            r#"{"avg-load-average": {"member_id": "m1", "value": 1}}"#,
            r#"{"avg-load-average": {"member_id": "m1", "value": "abc"}}"#,
            r#"{"avg-load-average": {"member_id": "m1", "value": "1", "value": "2"}}"#,
        ];

        for payload in payloads {
            assert!(dispatcher.dispatch(payload).is_err(), "{payload} accepted");
        }

        assert!(dispatcher
            .context()
            .member_metric(&location("m1"), MetricKind::LoadAverage)
            .is_none());
        assert_eq!(
            dispatcher.context().requests_in_flight("c1", "np1"),
            Some(Metric::default())
        );
    }

    #[test]
    fn decode_and_parse_errors_are_typed() {
        let dispatcher = test_dispatcher(Arc::default());
        assert!(matches!(
            dispatcher.dispatch("not-json"),
            Err(DispatchError::Decode(DecodeError::Json(_)))
        ));
        assert!(matches!(
            dispatcher.dispatch(&member_event("avg-load-average", "m1", "x")),
            Err(DispatchError::Event(EventError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn unmatched_event_is_ignored() {
        let dispatcher = test_dispatcher(Arc::default());
        let outcome = dispatcher
            .dispatch(r#"{"member-activated": {"member_id": "m1"}}"#)
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Ignored {
                event: "member-activated".to_string()
            }
        );
    }

    #[test]
    fn member_fault_example() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let dispatcher = test_dispatcher(provisioner.clone());

        let outcome = dispatcher
            .dispatch(r#"{"member-fault": {"cluster_id": "c1", "member_id": "m1"}}"#)
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Recovered(RecoveryOutcome::Replaced {
                partition_id: "p1".to_string()
            })
        );
        assert_eq!(
            *provisioner.calls.lock().unwrap(),
            vec!["terminate:m1".to_string(), "spawn:p1:c1".to_string()]
        );
    }

    #[tokio::test]
    async fn run_survives_bad_messages_and_stops_when_queue_closes() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let dispatcher = test_dispatcher(provisioner.clone());
        let (publisher, receiver) = HealthEventQueue::bounded(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        publisher.publish("not-json").await;
        publisher.publish(member_event("avg-load-average", "ghost", "1")).await;
        publisher.publish(member_event("avg-load-average", "m1", "oops")).await;
        publisher.publish(r#"{"heartbeat": {}}"#).await;
        publisher.publish(member_event("avg-load-average", "m1", "4.25")).await;
        publisher
            .publish(r#"{"member-fault": {"cluster_id": "c1", "member_id": "m2"}}"#)
            .await;
        drop(publisher);

        let stats = dispatcher.run(receiver, shutdown_rx).await;

        assert_eq!(
            stats,
            DispatchStats {
                received: 6,
                applied: 1,
                ignored: 1,
                dropped: 3,
                faults_handled: 1,
            }
        );
        let load = dispatcher
            .context()
            .member_metric(&location("m1"), MetricKind::LoadAverage)
            .unwrap();
        assert_eq!(load.average, 4.25);
        assert_eq!(provisioner.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_contains_collaborator_panics() {
        let provisioner = Arc::new(RecordingProvisioner {
            panic_on_terminate: true,
            ..Default::default()
        });
        let dispatcher = test_dispatcher(provisioner);
        let (publisher, receiver) = HealthEventQueue::bounded(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        publisher
            .publish(r#"{"member-fault": {"cluster_id": "c1", "member_id": "m1"}}"#)
            .await;
        publisher.publish(member_event("avg-load-average", "m1", "1.5")).await;
        drop(publisher);

        let stats = dispatcher.run(receiver, shutdown_rx).await;

        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.applied, 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let dispatcher = test_dispatcher(Arc::default());
        let (publisher, receiver) = HealthEventQueue::bounded(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run(receiver, shutdown_rx).await }
        });

        publisher.publish(member_event("avg-load-average", "m1", "2")).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        let stats = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.applied, 1);

        // The publisher is still alive: the loop exited on the signal alone.
        assert!(!publisher.publish("late").await);
    }

    #[tokio::test]
    async fn run_exits_immediately_if_already_shut_down() {
        let dispatcher = test_dispatcher(Arc::default());
        let (_publisher, receiver) = HealthEventQueue::bounded(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let stats = dispatcher.run(receiver, shutdown_rx).await;
        assert_eq!(stats, DispatchStats::default());
    }

    #[tokio::test]
    async fn run_survives_dropped_shutdown_sender() {
        let dispatcher = test_dispatcher(Arc::default());
        let (publisher, receiver) = HealthEventQueue::bounded(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run(receiver, shutdown_rx).await }
        });

        drop(shutdown_tx);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        assert!(publisher.publish(member_event("avg-load-average", "m1", "2")).await);
        drop(publisher);

        let stats = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.applied, 1);
    }
}
