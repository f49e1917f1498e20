//! fleetscale-topology — the live topology graph as seen by the autoscaler.
//!
//! Holds the Service → Cluster → Member forest behind a process-wide
//! readers-writer lock, the partition registry that maps partitions to
//! network partitions, and the `TopologyIndex` read path used to locate
//! a member inside the monitoring hierarchy.
//!
//! # Architecture
//!
//! ```text
//! TopologyIndex
//!   ├── TopologyStore (Arc<RwLock<Topology>>, shared with topology feeds)
//!   │   └── Service → Cluster → Member
//!   └── PartitionRegistry (partition_id → network_partition_id)
//! ```
//!
//! Lookups are full scans under the read lock. The lock is released on
//! every exit path and never held while the caller talks to other
//! collaborators.

pub mod error;
pub mod index;
pub mod registry;
pub mod store;
pub mod types;

pub use error::{TopologyError, TopologyResult};
pub use index::{MemberLocation, TopologyIndex};
pub use registry::{PartitionMap, PartitionRegistry};
pub use store::TopologyStore;
pub use types::*;
