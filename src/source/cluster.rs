//! # Static sharding across several supervisor instances.
//!
//! With `n` instances, instance `i` handles exactly the jobs whose id hashes to
//! `crc32(id) % n == i`. The assignment comes from a [`ClusterConfiguration`]
//! loaded once at startup by a [`ClusterConfigurationProvider`]:
//!
//! - [`FileClusterConfigurationProvider`]: `{"numberOfInstances": n, "instanceNumber": i}`
//! - [`EnvironmentClusterConfigurationProvider`]: two environment variables
//!
//! ## Rules
//! - `number_of_instances > 0` and `instance_number < number_of_instances`.
//! - Every id lands on exactly one instance.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ClusterConfigurationError, SourceError};
use crate::jobs::{JobId, RawConfiguration};
use crate::source::source::ConfigurationSource;

/// Default variable holding the cluster size.
pub const ENV_NUMBER_OF_INSTANCES: &str = "PROCVISOR_NUMBER_OF_INSTANCES";
/// Default variable holding this instance's number.
pub const ENV_INSTANCE_NUMBER: &str = "PROCVISOR_INSTANCE_NUMBER";

/// Validated shard assignment of this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConfiguration {
    instance_number: u32,
    number_of_instances: u32,
}

impl ClusterConfiguration {
    /// Validates and builds an assignment.
    pub fn new(instance_number: u32, number_of_instances: u32) -> Result<Self, ClusterConfigurationError> {
        if number_of_instances == 0 || instance_number >= number_of_instances {
            return Err(ClusterConfigurationError::OutOfRange {
                instance_number,
                number_of_instances,
            });
        }
        Ok(Self {
            instance_number,
            number_of_instances,
        })
    }

    /// Single-instance deployment: every job belongs here.
    pub fn single() -> Self {
        Self {
            instance_number: 0,
            number_of_instances: 1,
        }
    }

    /// This instance's number (0-based).
    pub fn instance_number(&self) -> u32 {
        self.instance_number
    }

    /// Cluster size.
    pub fn number_of_instances(&self) -> u32 {
        self.number_of_instances
    }

    /// True if `id` is assigned to this instance.
    pub fn owns(&self, id: &JobId) -> bool {
        crc32fast::hash(id.as_str().as_bytes()) % self.number_of_instances == self.instance_number
    }
}

impl fmt::Display for ClusterConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "number of instances = {}, instance number = {}",
            self.number_of_instances, self.instance_number
        )
    }
}

/// Loads a [`ClusterConfiguration`].
pub trait ClusterConfigurationProvider {
    /// Reads and validates the assignment.
    fn load_cluster_configuration(&self) -> Result<ClusterConfiguration, ClusterConfigurationError>;
}

/// Reads `{"numberOfInstances": n, "instanceNumber": i}` from a JSON file.
#[derive(Debug, Clone)]
pub struct FileClusterConfigurationProvider {
    path: PathBuf,
}

impl FileClusterConfigurationProvider {
    /// Provider backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ClusterConfigurationProvider for FileClusterConfigurationProvider {
    fn load_cluster_configuration(&self) -> Result<ClusterConfiguration, ClusterConfigurationError> {
        let contents = std::fs::read(&self.path).map_err(|source| ClusterConfigurationError::Read {
            path: self.path.clone(),
            source,
        })?;
        let doc: Value =
            serde_json::from_slice(&contents).map_err(|source| ClusterConfigurationError::Parse {
                path: self.path.clone(),
                source,
            })?;
        let number_of_instances = json_u32(&doc, "numberOfInstances")?;
        let instance_number = json_u32(&doc, "instanceNumber")?;
        ClusterConfiguration::new(instance_number, number_of_instances)
    }
}

fn json_u32(doc: &Value, field: &str) -> Result<u32, ClusterConfigurationError> {
    let value = doc.get(field);
    value
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ClusterConfigurationError::NotAnInteger {
            field: field.to_string(),
            value: value.map(Value::to_string),
        })
}

/// Reads the assignment from two environment variables.
#[derive(Debug, Clone)]
pub struct EnvironmentClusterConfigurationProvider {
    var_number_of_instances: String,
    var_instance_number: String,
}

impl Default for EnvironmentClusterConfigurationProvider {
    fn default() -> Self {
        Self::new(ENV_NUMBER_OF_INSTANCES, ENV_INSTANCE_NUMBER)
    }
}

impl EnvironmentClusterConfigurationProvider {
    /// Provider reading the given variable names.
    pub fn new(var_number_of_instances: impl Into<String>, var_instance_number: impl Into<String>) -> Self {
        Self {
            var_number_of_instances: var_number_of_instances.into(),
            var_instance_number: var_instance_number.into(),
        }
    }

    /// Builds the assignment from already looked-up values.
    pub fn from_values(
        &self,
        number_of_instances: Option<&str>,
        instance_number: Option<&str>,
    ) -> Result<ClusterConfiguration, ClusterConfigurationError> {
        let instance_number = digits(&self.var_instance_number, instance_number)?;
        let number_of_instances = digits(&self.var_number_of_instances, number_of_instances)?;
        ClusterConfiguration::new(instance_number, number_of_instances)
    }
}

impl ClusterConfigurationProvider for EnvironmentClusterConfigurationProvider {
    fn load_cluster_configuration(&self) -> Result<ClusterConfiguration, ClusterConfigurationError> {
        let number_of_instances = std::env::var(&self.var_number_of_instances).ok();
        let instance_number = std::env::var(&self.var_instance_number).ok();
        self.from_values(number_of_instances.as_deref(), instance_number.as_deref())
    }
}

fn digits(var: &str, value: Option<&str>) -> Result<u32, ClusterConfigurationError> {
    value
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ClusterConfigurationError::NotAnInteger {
            field: var.to_string(),
            value: value.map(str::to_string),
        })
}

/// Passes through only the jobs assigned to this instance.
pub struct ShardingConfigurationSource<S> {
    inner: S,
    cluster: ClusterConfiguration,
}

impl<S: ConfigurationSource> ShardingConfigurationSource<S> {
    /// Filters `inner` by `cluster`.
    pub fn new(inner: S, cluster: ClusterConfiguration) -> Self {
        Self { inner, cluster }
    }

    /// The assignment in use.
    pub fn cluster(&self) -> ClusterConfiguration {
        self.cluster
    }
}

#[async_trait]
impl<S: ConfigurationSource> ConfigurationSource for ShardingConfigurationSource<S> {
    async fn load_configuration(&self) -> Result<RawConfiguration, SourceError> {
        let mut jobs = self.inner.load_configuration().await?;
        jobs.retain(|id, _| self.cluster.owns(id));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockConfigurationSource;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_cluster_configuration_bounds() {
        assert!(ClusterConfiguration::new(0, 1).is_ok());
        assert!(ClusterConfiguration::new(2, 3).is_ok());
        assert!(ClusterConfiguration::new(3, 3).is_err());
        assert!(ClusterConfiguration::new(0, 0).is_err());
        assert_eq!(
            ClusterConfiguration::new(1, 4).unwrap().to_string(),
            "number of instances = 4, instance number = 1"
        );
    }

    #[test]
    fn test_each_id_lands_on_exactly_one_instance() {
        let shards: Vec<_> = (0..3)
            .map(|i| ClusterConfiguration::new(i, 3).unwrap())
            .collect();
        for n in 0..200u64 {
            let id = JobId::from(n);
            assert_eq!(shards.iter().filter(|c| c.owns(&id)).count(), 1);
        }
        assert!((0..50u64).all(|n| ClusterConfiguration::single().owns(&JobId::from(n))));
    }

    #[tokio::test]
    async fn test_sharding_source_partitions_jobs() {
        let source = MockConfigurationSource::new();
        for n in 0..20u64 {
            source.upsert(JobId::from(n), json!({"name": n}));
        }
        let mut total = 0;
        for i in 0..2 {
            let sharded =
                ShardingConfigurationSource::new(source.clone(), ClusterConfiguration::new(i, 2).unwrap());
            let jobs = sharded.load_configuration().await.unwrap();
            assert!(jobs.keys().all(|id| sharded.cluster().owns(id)));
            total += jobs.len();
        }
        assert_eq!(total, 20);
    }

    #[test]
    fn test_environment_provider_requires_digits() {
        let provider = EnvironmentClusterConfigurationProvider::default();
        let cluster = provider.from_values(Some("4"), Some("3")).unwrap();
        assert_eq!(cluster.instance_number(), 3);
        assert_eq!(cluster.number_of_instances(), 4);

        let err = provider.from_values(Some("4"), Some("-1")).unwrap_err();
        assert!(err.to_string().contains(ENV_INSTANCE_NUMBER));
        assert!(provider.from_values(None, Some("0")).is_err());
        assert!(matches!(
            provider.from_values(Some("2"), Some("2")),
            Err(ClusterConfigurationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_file_provider_reads_assignment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"numberOfInstances": 5, "instanceNumber": 2}}"#).unwrap();
        let cluster = FileClusterConfigurationProvider::new(file.path())
            .load_cluster_configuration()
            .unwrap();
        assert_eq!(cluster, ClusterConfiguration::new(2, 5).unwrap());
    }

    #[test]
    fn test_file_provider_rejects_bad_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"numberOfInstances": "five", "instanceNumber": 2}}"#).unwrap();
        let err = FileClusterConfigurationProvider::new(file.path())
            .load_cluster_configuration()
            .unwrap_err();
        assert!(matches!(err, ClusterConfigurationError::NotAnInteger { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = FileClusterConfigurationProvider::new(file.path())
            .load_cluster_configuration()
            .unwrap_err();
        assert!(matches!(err, ClusterConfigurationError::Parse { .. }));
    }
}
