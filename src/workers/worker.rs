//! # Worker contract and registry.
//!
//! A [`Worker`] is the pluggable business logic run inside each worker
//! process: [`start`](Worker::start) once with the job's `workerConfig`, then
//! [`cycle`](Worker::cycle) repeatedly until the process is told to stop.
//!
//! The [`WorkerRegistry`] maps the `workerClass` identifier from a job config
//! to a constructor. It is consulted twice: by the validator (unknown class →
//! job rejected) and inside the worker process (class → fresh instance).

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::jobs::WorkerConfig;

/// # Pluggable unit of business logic.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use procvisor::{Worker, WorkerConfig, WorkerError};
///
/// #[derive(Default)]
/// struct Echo { greeting: String }
///
/// #[async_trait]
/// impl Worker for Echo {
///     async fn start(&mut self, config: &WorkerConfig) -> Result<(), WorkerError> {
///         self.greeting = config
///             .get("greeting")
///             .and_then(|v| v.as_str())
///             .unwrap_or("hello")
///             .to_string();
///         Ok(())
///     }
///
///     async fn cycle(&mut self) -> Result<(), WorkerError> {
///         println!("{}", self.greeting);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Worker: Send + 'static {
    /// Called once with the job's worker configuration.
    async fn start(&mut self, config: &WorkerConfig) -> Result<(), WorkerError>;

    /// Called repeatedly until the process is stopped.
    async fn cycle(&mut self) -> Result<(), WorkerError>;
}

/// Constructor for a registered worker class.
pub type WorkerFactory = fn() -> Box<dyn Worker>;

/// Maps `workerClass` identifiers to constructors.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    factories: BTreeMap<String, WorkerFactory>,
}

impl WorkerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a worker class.
    pub fn register(&mut self, class: impl Into<String>, factory: WorkerFactory) -> &mut Self {
        self.factories.insert(class.into(), factory);
        self
    }

    /// True if `class` is registered.
    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Builds a fresh instance of `class`.
    pub fn create(&self, class: &str) -> Option<Box<dyn Worker>> {
        self.factories.get(class).map(|factory| factory())
    }

    /// Registered class names, sorted.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.classes()).finish()
    }
}
