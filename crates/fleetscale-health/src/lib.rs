//! fleetscale-health — the autoscaler's health event pipeline.
//!
//! Consumes per-member health statistics (load average, memory
//! consumption, requests in flight, and their derivatives) from an
//! inbound queue, folds them into the monitoring context tree, and
//! replaces members reported as faulty.
//!
//! # Architecture
//!
//! ```text
//! HealthEventDispatcher (single consumer task)
//!   ├── HealthEventReceiver::take()      — the only suspension point
//!   ├── RawEvent::decode → HealthEvent   — typed at the boundary
//!   ├── TopologyIndex                    — member → cluster/partition path
//!   ├── AutoscalerContext                — ClusterMonitor
//!   │     └── NetworkPartitionContext (requests in flight)
//!   │           └── PartitionContext
//!   │                 └── MemberStatsContext (load, memory)
//!   └── FaultRecovery → Provisioner      — terminate, then respawn
//! ```
//!
//! # Failure isolation
//!
//! Every failure inside one message (decode, lookup, parse, provisioning,
//! even a panic in a collaborator) is logged and the loop moves on to the
//! next message. The loop only stops on its shutdown signal or when every
//! publisher has been dropped.

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod metric;
pub mod provisioner;
pub mod queue;
pub mod recovery;

pub use context::{
    AutoscalerContext, ClusterMonitor, MemberStatsContext, NetworkPartitionContext,
    PartitionContext,
};
pub use dispatcher::{DispatchOutcome, DispatchStats, HealthEventDispatcher};
pub use error::{ContextError, ContextResult, DecodeError, DispatchError, EventError};
pub use event::{HealthEvent, RawEvent};
pub use metric::{Metric, MetricField, MetricKind};
pub use provisioner::{Provisioner, SpawningError, TerminationError};
pub use queue::{HealthEventPublisher, HealthEventQueue, HealthEventReceiver};
pub use recovery::{FaultRecovery, RecoveryOutcome};
