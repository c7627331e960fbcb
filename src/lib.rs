//! # procvisor
//!
//! **Procvisor** keeps a declarative fleet of long-running worker processes
//! alive on a Unix host.
//!
//! A configuration source describes the desired jobs. A configuration process
//! polls it and pushes every change to the supervisor, which reconciles its job
//! store, starts and stops worker processes, restarts crashed ones with
//! exponential backoff and drains everything on shutdown.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  ConfigurationSource (file / mock / sharded)
//!        │ load_configuration()
//!        ▼
//! ┌──────────────────────────┐    config socket    ┌───────────────────────────────────┐
//! │  ConfigurationProcess    │ ──────────────────► │  Supervisor (single loop)         │
//! │  (child, PROCVISOR_ROLE  │    JSON ► "ok"      │  - JobStore (state machine)       │
//! │   = config)              │ ◄── SIGHUP ──────── │  - ConfigProcessManager           │
//! └──────────────────────────┘ ─── SIGUSR1 ──────► │  - ProcessLauncher (spawn/kill)   │
//!                                                  │  - Bus (lifecycle events)         │
//!  procvisorctl ───────────── control socket ────► │                                   │
//!  (status, restart, reload, metrics, stop)        └───────┬───────────────────┬───────┘
//!                                                          │ spawn / SIGTERM   │ publish
//!                                                          ▼ SIGKILL / reap    ▼
//!                                             ┌────────────────────┐   ┌──────────────────┐
//!                                             │  WorkerProcess     │   │  SubscriberSet   │
//!                                             │  (child per job,   │   │  └─ LogWriter    │
//!                                             │   start + cycle)   │   │  └─ ...          │
//!                                             └────────────────────┘   └──────────────────┘
//! ```
//!
//! ### Job lifecycle
//! ```text
//! configuration ──► ADDED ──► start ──► running ──► exited
//!                                          ▲           │
//!                                          │           ├─ ran < shortRunTimeSeconds ─► restart_at = now + backoff (doubles)
//!                                          │           └─ ran long enough          ─► backoff reset, restart_at = now
//!                                          └──── slate_scheduled_restarts ◄────────┘
//!
//! changed mtime ──► UPDATED ──► restart (SIGTERM, then start)
//! missing id    ──► REMOVED ──► stop (SIGTERM, SIGKILL after shutdownTimeoutSeconds) ──► purged
//! ```
//!
//! ## Features
//! | Area               | Description                                                    | Key types / traits                                  |
//! |--------------------|----------------------------------------------------------------|-----------------------------------------------------|
//! | **Workers**        | Implement the start/cycle contract of a job.                   | [`Worker`], [`WorkerRegistry`], [`MockWorker`]      |
//! | **Sources**        | Where job configurations come from, optionally sharded.        | [`ConfigurationSource`], [`ShardingConfigurationSource`] |
//! | **Supervision**    | Reconcile, restart with backoff, drain on shutdown.            | [`Supervisor`], [`JobStore`]                        |
//! | **Policies**       | Backoff growth and jitter.                                     | [`BackoffPolicy`], [`Backoff`], [`JitterPolicy`]    |
//! | **Subscriber API** | Hook into lifecycle events.                                    | [`Subscribe`], [`LogWriter`]                        |
//! | **Errors**         | Typed errors with stable labels.                               | [`RuntimeError`], [`WorkerError`], [`SourceError`]  |
//! | **Configuration**  | Centralized runtime settings with environment overrides.       | [`SupervisorConfig`]                                |
//!
//! ## Example
//! ```rust,no_run
//! use procvisor::{FileConfigurationSource, Launcher, MockWorker, SupervisorConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> std::process::ExitCode {
//!     let cfg = SupervisorConfig::from_env().unwrap_or_default();
//!
//!     // Every role (supervisor, config process, worker) runs this same code.
//!     Launcher::new(cfg)
//!         .with_worker("mock", MockWorker::factory)
//!         .with_source(FileConfigurationSource::new("/etc/procvisor/jobs.json"))
//!         .run()
//!         .await
//!         .into()
//! }
//! ```
mod core;
mod error;
mod events;
mod ipc;
mod jobs;
mod policies;
mod source;
mod subscribers;
mod workers;

// ---- Public re-exports ----

pub use core::{
    ChildRole, ConfigProcessPolicy, ConfigurationProcess, ControlCommand, ENV_CONFIG_POLL_SECONDS, ENV_ROLE,
    ENV_SOCKET_DIR, ENV_TICK_SECONDS, ENV_WORKER_CYCLE_SECONDS, ExecLauncher, ExitCode, Launcher, LoopInputs,
    ProcessLauncher, SignalEvent, Supervisor, SupervisorConfig,
};
pub use error::{
    ClusterConfigurationError, FieldError, FieldErrorKind, IpcError, LaunchError, RuntimeError, SourceError,
    ValidationError, WorkerError,
};
pub use events::{Bus, Event, EventKind};
pub use ipc::{
    CONFIG_SOCKET, CONTROL_SOCKET, Channel, MessageClient, MessageServer, RESP_EDESERIALIZE, RESP_OK, Request,
    default_socket_dirs, find_in,
};
pub use jobs::{
    CfState, Clock, Configuration, ConfigurationValidator, ExitStatus, Job, JobConfig, JobId, JobState, JobStore,
    ManualClock, Pid, RawConfiguration, SystemClock, Timestamp, WorkerConfig,
};
pub use policies::{Backoff, BackoffPolicy, JitterPolicy};
pub use source::{
    ClusterConfiguration, ClusterConfigurationProvider, ConfigurationSource, ENV_INSTANCE_NUMBER,
    ENV_NUMBER_OF_INSTANCES, EnvironmentClusterConfigurationProvider, FileClusterConfigurationProvider,
    FileConfigurationSource, MockConfigurationSource, ShardingConfigurationSource,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use workers::{MockWorker, Worker, WorkerFactory, WorkerProcess, WorkerRegistry};
