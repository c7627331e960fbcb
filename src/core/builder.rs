//! # Launcher: one binary, three roles.
//!
//! Children are re-executions of the current binary. [`Launcher::run`] looks
//! at `PROCVISOR_ROLE` once at startup and becomes one of:
//!
//! ```text
//! PROCVISOR_ROLE unset   ──► Supervisor::run(subscribers)       (ExecLauncher)
//! PROCVISOR_ROLE=config  ──► ConfigurationProcess::run(SIGHUP, SIGTERM/SIGINT)
//! PROCVISOR_ROLE=worker  ──► WorkerProcess::run(SIGTERM/SIGINT)
//! ```
//!
//! The same `Launcher` value must be built in all roles, so the binary
//! registers the same worker classes and source whatever role it ends up in.

use std::sync::Arc;

use tracing::error;

use crate::core::config::SupervisorConfig;
use crate::core::config_process::ConfigurationProcess;
use crate::core::exit::ExitCode;
use crate::core::signals::{reload_notify, shutdown_token};
use crate::core::spawn::{ChildRole, ENV_CONFIG_SOCKET, ENV_JOB_CONFIG, ENV_JOB_ID, ExecLauncher, supervisor_pid_from_env};
use crate::core::supervisor::Supervisor;
use crate::error::RuntimeError;
use crate::jobs::{JobConfig, JobId};
use crate::source::{ConfigurationSource, MockConfigurationSource};
use crate::subscribers::{LogWriter, Subscribe};
use crate::workers::{WorkerFactory, WorkerProcess, WorkerRegistry};

/// Entry point of a procvisor binary.
pub struct Launcher {
    cfg: SupervisorConfig,
    workers: WorkerRegistry,
    source: Box<dyn ConfigurationSource>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl Launcher {
    /// Creates a launcher with no worker classes, an empty mock source and a [`LogWriter`].
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            workers: WorkerRegistry::new(),
            source: Box::new(MockConfigurationSource::new()),
            subscribers: vec![Arc::new(LogWriter::new())],
        }
    }

    /// Registers a worker class.
    pub fn with_worker(mut self, class: impl Into<String>, factory: WorkerFactory) -> Self {
        self.workers.register(class, factory);
        self
    }

    /// Sets the configuration source polled by the configuration process.
    pub fn with_source(mut self, source: impl ConfigurationSource) -> Self {
        self.source = Box::new(source);
        self
    }

    /// Adds event subscribers next to the default [`LogWriter`].
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers.extend(subscribers);
        self
    }

    /// Registered worker classes.
    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    /// Runs the role selected by the environment and returns the process exit code.
    pub async fn run(self) -> ExitCode {
        let outcome = match ChildRole::from_env() {
            Ok(None) => self.run_supervisor().await,
            Ok(Some(ChildRole::Config)) => self.run_config_process().await,
            Ok(Some(ChildRole::Worker)) => self.run_worker().await,
            Err(e) => Err(e),
        };
        outcome.unwrap_or_else(|e| {
            error!(label = e.as_label(), error = %e, "fatal error");
            e.exit_code()
        })
    }

    async fn run_supervisor(self) -> Result<ExitCode, RuntimeError> {
        let launcher = ExecLauncher::new(&self.cfg)?;
        Supervisor::new(self.cfg, self.workers, launcher)
            .run(self.subscribers)
            .await
    }

    async fn run_config_process(self) -> Result<ExitCode, RuntimeError> {
        let supervisor_pid = supervisor_pid_from_env()?;
        let socket = std::env::var_os(ENV_CONFIG_SOCKET)
            .ok_or_else(|| RuntimeError::ChildEnvironment(format!("{ENV_CONFIG_SOCKET} is not set")))?;
        let poll_pause = SupervisorConfig::from_env()?.poll_pause();

        let reload = reload_notify().map_err(RuntimeError::Signals)?;
        let token = shutdown_token().map_err(RuntimeError::Signals)?;
        Ok(ConfigurationProcess::new(self.source, socket, supervisor_pid, poll_pause)
            .run(reload, token)
            .await)
    }

    async fn run_worker(self) -> Result<ExitCode, RuntimeError> {
        let supervisor_pid = supervisor_pid_from_env()?;
        let id = std::env::var(ENV_JOB_ID)
            .map_err(|_| RuntimeError::ChildEnvironment(format!("{ENV_JOB_ID} is not set")))?;
        let raw = std::env::var(ENV_JOB_CONFIG)
            .map_err(|_| RuntimeError::ChildEnvironment(format!("{ENV_JOB_CONFIG} is not set")))?;
        let (id, config) = decode_job(&id, &raw)?;
        let worker = self.workers.create(&config.worker_class).ok_or_else(|| {
            RuntimeError::ChildEnvironment(format!("unknown worker class {:?}", config.worker_class))
        })?;
        let interval = SupervisorConfig::from_env()?.worker_cycle_interval;

        let token = shutdown_token().map_err(RuntimeError::Signals)?;
        Ok(WorkerProcess::new(id, worker, supervisor_pid, interval)
            .run(&config.worker_config, token)
            .await)
    }
}

fn decode_job(id: &str, raw: &str) -> Result<(JobId, JobConfig), RuntimeError> {
    let config = serde_json::from_str::<JobConfig>(raw)
        .map_err(|e| RuntimeError::ChildEnvironment(format!("{ENV_JOB_CONFIG} is not a job config: {e}")))?;
    Ok((JobId::new(id), config))
}
