//! # Configuration sources.
//!
//! A [`ConfigurationSource`] returns the full mapping of job id → raw job
//! config. Sources know nothing about validation or diffs; the configuration
//! process polls them and pushes changes to the supervisor.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::SourceError;
use crate::jobs::{Clock, JobId, RawConfiguration, SystemClock};

/// # Where job configurations come from.
///
/// Errors are not fatal: the poll is logged as failed and the supervisor keeps
/// its current jobs until a later poll succeeds.
#[async_trait]
pub trait ConfigurationSource: Send + Sync + 'static {
    /// Loads the complete current configuration.
    async fn load_configuration(&self) -> Result<RawConfiguration, SourceError>;
}

#[async_trait]
impl<S: ConfigurationSource + ?Sized> ConfigurationSource for Arc<S> {
    async fn load_configuration(&self) -> Result<RawConfiguration, SourceError> {
        (**self).load_configuration().await
    }
}

#[async_trait]
impl ConfigurationSource for Box<dyn ConfigurationSource> {
    async fn load_configuration(&self) -> Result<RawConfiguration, SourceError> {
        (**self).load_configuration().await
    }
}

/// Reads a JSON object `{ "<id>": { job config }, ... }` from a file on every poll.
#[derive(Debug, Clone)]
pub struct FileConfigurationSource {
    path: PathBuf,
}

impl FileConfigurationSource {
    /// Source backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigurationSource for FileConfigurationSource {
    async fn load_configuration(&self) -> Result<RawConfiguration, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Read {
                path: self.path.clone(),
                source,
            })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// In-memory source whose mapping can be swapped at runtime through any clone.
#[derive(Debug, Clone, Default)]
pub struct MockConfigurationSource {
    jobs: Arc<RwLock<RawConfiguration>>,
    touched: Arc<RwLock<BTreeSet<JobId>>>,
}

impl MockConfigurationSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Three mock jobs (`23`, `33`, `42`); `42` reports a fresh `mtime` on every
    /// poll so it keeps being restarted with new configuration.
    pub fn demo() -> Self {
        let now = SystemClock.now();
        let source = Self::new();
        for (id, name) in [(23, "twenty-three"), (33, "thirty-three"), (42, "forty-two")] {
            source.upsert(
                JobId::from(id),
                json!({"name": name, "workerClass": "mock", "mtime": now}),
            );
        }
        source.touch_on_poll(JobId::from(42));
        source
    }

    /// Makes every poll report `id` with `mtime = now`.
    pub fn touch_on_poll(&self, id: JobId) {
        self.touched
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
    }

    /// Replaces the whole mapping.
    pub fn set(&self, jobs: RawConfiguration) {
        *self.jobs.write().unwrap_or_else(|e| e.into_inner()) = jobs;
    }

    /// Inserts or replaces one job.
    pub fn upsert(&self, id: JobId, config: Value) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, config);
    }

    /// Removes one job.
    pub fn remove(&self, id: &JobId) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

#[async_trait]
impl ConfigurationSource for MockConfigurationSource {
    async fn load_configuration(&self) -> Result<RawConfiguration, SourceError> {
        let mut jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner()).clone();
        let now = SystemClock.now();
        for id in self.touched.read().unwrap_or_else(|e| e.into_inner()).iter() {
            if let Some(Value::Object(job)) = jobs.get_mut(id) {
                job.insert("mtime".into(), json!(now));
            }
        }
        Ok(jobs)
    }
}
