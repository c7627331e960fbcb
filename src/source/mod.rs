//! # Configuration sources polled by the configuration process.
//!
//! - [`ConfigurationSource`] `load_configuration() -> id → raw job config`
//! - [`FileConfigurationSource`] JSON file
//! - [`MockConfigurationSource`] in-memory, for tests and demos
//! - [`ShardingConfigurationSource`] keeps only this instance's shard of another source

mod cluster;
mod source;

pub use cluster::{
    ClusterConfiguration, ClusterConfigurationProvider, ENV_INSTANCE_NUMBER, ENV_NUMBER_OF_INSTANCES,
    EnvironmentClusterConfigurationProvider, FileClusterConfigurationProvider,
    ShardingConfigurationSource,
};
pub use source::{ConfigurationSource, FileConfigurationSource, MockConfigurationSource};
