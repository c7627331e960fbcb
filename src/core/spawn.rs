//! # Child process launching.
//!
//! Children are the current executable re-run with a role selector in the
//! environment; [`Launcher::run`](crate::Launcher::run) reads it back and
//! dispatches to the matching child runner.
//!
//! ```text
//! supervisor ── ProcessLauncher::spawn_worker(id, config) ──► exe  PROCVISOR_ROLE=worker
//!            ── ProcessLauncher::spawn_config_process()   ──► exe  PROCVISOR_ROLE=config
//!            ── ProcessLauncher::signal(pid, SIGTERM/...)  ──► kill(2)
//!            ── ProcessLauncher::reap()                    ──► waitpid(-1, WNOHANG)
//! ```
//!
//! Exec resets signal dispositions and closes the supervisor's sockets
//! (close-on-exec), so a child never inherits supervisor-only resources.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid as NixPid, getppid};
use tracing::debug;

use crate::core::config::{ENV_CONFIG_POLL_SECONDS, ENV_WORKER_CYCLE_SECONDS, SupervisorConfig};
use crate::core::reaper::reap_children;
use crate::error::{LaunchError, RuntimeError};
use crate::jobs::{ExitStatus, JobConfig, JobId, Pid};

/// Selects the child role of a re-executed process.
pub const ENV_ROLE: &str = "PROCVISOR_ROLE";
/// Pid the child expects as its parent.
pub const ENV_SUPERVISOR_PID: &str = "PROCVISOR_SUPERVISOR_PID";
/// Job id of a worker child.
pub const ENV_JOB_ID: &str = "PROCVISOR_JOB_ID";
/// Validated job config of a worker child (JSON).
pub const ENV_JOB_CONFIG: &str = "PROCVISOR_JOB_CONFIG";
/// Config socket path for the configuration process.
pub const ENV_CONFIG_SOCKET: &str = "PROCVISOR_CONFIG_SOCKET";

/// What a re-executed process runs as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildRole {
    /// Runs one job's worker.
    Worker,
    /// Polls the configuration source.
    Config,
}

impl ChildRole {
    /// Value of [`ENV_ROLE`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildRole::Worker => "worker",
            ChildRole::Config => "config",
        }
    }

    /// Parses a [`ENV_ROLE`] value.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "worker" => Some(ChildRole::Worker),
            "config" => Some(ChildRole::Config),
            _ => None,
        }
    }

    /// Role of the current process, `None` for the supervisor itself.
    pub fn from_env() -> Result<Option<Self>, RuntimeError> {
        match std::env::var(ENV_ROLE) {
            Err(_) => Ok(None),
            Ok(raw) => Self::parse(&raw)
                .map(Some)
                .ok_or_else(|| RuntimeError::ChildEnvironment(format!("unknown role {raw:?}"))),
        }
    }
}

/// Spawns and signals child processes on behalf of the supervisor loop.
pub trait ProcessLauncher: Send {
    /// Launches the worker process of `id`; returns its pid without waiting.
    fn spawn_worker(&mut self, id: &JobId, config: &JobConfig) -> Result<Pid, LaunchError>;

    /// Launches the configuration process, pointing it at `socket`.
    fn spawn_config_process(&mut self, socket: &Path) -> Result<Pid, LaunchError>;

    /// Delivers `signal` to `pid`.
    fn signal(&mut self, pid: Pid, signal: Signal) -> Result<(), LaunchError>;

    /// Collects children that terminated since the last call, without blocking.
    fn reap(&mut self) -> Vec<(Pid, ExitStatus)>;
}

/// [`ProcessLauncher`] that re-executes the current binary.
#[derive(Clone, Debug)]
pub struct ExecLauncher {
    exe: PathBuf,
    args: Vec<OsString>,
    supervisor_pid: Pid,
    poll_interval: Duration,
    cycle_interval: Duration,
}

impl ExecLauncher {
    /// Launcher re-running this executable with this process' arguments.
    pub fn new(config: &SupervisorConfig) -> Result<Self, RuntimeError> {
        Ok(Self {
            exe: std::env::current_exe()?,
            args: std::env::args_os().skip(1).collect(),
            supervisor_pid: current_pid(),
            poll_interval: config.config_poll_interval,
            cycle_interval: config.worker_cycle_interval,
        })
    }

    /// Overrides the executable and its arguments.
    pub fn with_command(mut self, exe: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        self.exe = exe.into();
        self.args = args;
        self
    }

    fn command(&self, role: ChildRole) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.args(&self.args)
            .env(ENV_ROLE, role.as_str())
            .env(ENV_SUPERVISOR_PID, self.supervisor_pid.to_string())
            .stdin(Stdio::null());
        cmd
    }

    fn spawn(&self, mut cmd: Command, role: ChildRole) -> Result<Pid, LaunchError> {
        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            role: role.as_str(),
            source,
        })?;
        // Reaped through waitpid(-1); the handle is not needed.
        let pid = child.id() as Pid;
        debug!(role = role.as_str(), pid, "child spawned");
        Ok(pid)
    }
}

impl ProcessLauncher for ExecLauncher {
    fn spawn_worker(&mut self, id: &JobId, config: &JobConfig) -> Result<Pid, LaunchError> {
        let encoded = serde_json::to_string(config)?;
        let mut cmd = self.command(ChildRole::Worker);
        cmd.env(ENV_JOB_ID, id.as_str())
            .env(ENV_JOB_CONFIG, encoded)
            .env(ENV_WORKER_CYCLE_SECONDS, self.cycle_interval.as_secs().to_string());
        self.spawn(cmd, ChildRole::Worker)
    }

    fn spawn_config_process(&mut self, socket: &Path) -> Result<Pid, LaunchError> {
        let mut cmd = self.command(ChildRole::Config);
        cmd.env(ENV_CONFIG_SOCKET, socket)
            .env(ENV_CONFIG_POLL_SECONDS, self.poll_interval.as_secs().to_string());
        self.spawn(cmd, ChildRole::Config)
    }

    fn signal(&mut self, pid: Pid, signal: Signal) -> Result<(), LaunchError> {
        send_signal(pid, signal)
    }

    fn reap(&mut self) -> Vec<(Pid, ExitStatus)> {
        reap_children()
    }
}

/// Sends `signal` to `pid` with `kill(2)`.
pub fn send_signal(pid: Pid, signal: Signal) -> Result<(), LaunchError> {
    kill(NixPid::from_raw(pid), signal).map_err(|source| LaunchError::Signal {
        pid,
        signal: signal.as_str(),
        source,
    })
}

/// Pid of the calling process.
pub fn current_pid() -> Pid {
    std::process::id() as Pid
}

/// Pid of the calling process' parent.
pub fn parent_pid() -> Pid {
    getppid().as_raw()
}

/// Supervisor pid handed over to a child through [`ENV_SUPERVISOR_PID`].
pub fn supervisor_pid_from_env() -> Result<Pid, RuntimeError> {
    let raw = std::env::var(ENV_SUPERVISOR_PID)
        .map_err(|_| RuntimeError::ChildEnvironment(format!("{ENV_SUPERVISOR_PID} is not set")))?;
    raw.parse::<Pid>()
        .map_err(|_| RuntimeError::ChildEnvironment(format!("{ENV_SUPERVISOR_PID}={raw:?} is not a pid")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_its_label() {
        for role in [ChildRole::Worker, ChildRole::Config] {
            assert_eq!(ChildRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(ChildRole::parse("supervisor"), None);
    }

    #[test]
    fn test_parent_of_test_process_is_not_itself() {
        assert_ne!(parent_pid(), current_pid());
    }

    #[test]
    fn test_signalling_missing_pid_fails() {
        // pid_max is far below i32::MAX on Linux.
        let err = send_signal(i32::MAX, Signal::SIGTERM).unwrap_err();
        assert_eq!(err.as_label(), "launch_signal");
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let mut launcher = ExecLauncher::new(&SupervisorConfig::default())
            .unwrap()
            .with_command("/nonexistent/procvisor", vec![]);
        let err = launcher
            .spawn_worker(&JobId::from(1), &JobConfig::new("one", "mock", 1))
            .unwrap_err();
        assert_eq!(err.as_label(), "launch_spawn");
    }
}
