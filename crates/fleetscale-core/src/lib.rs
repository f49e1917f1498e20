pub mod config;

pub use config::{
    ClusterConfig, ConfigError, FleetConfig, LoggingConfig, MemberConfig, NetworkPartitionConfig,
    QueueConfig, ServiceConfig,
};
