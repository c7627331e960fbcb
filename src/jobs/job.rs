//! # Job data model.
//!
//! A [`Job`] pairs the validated [`JobConfig`] reported by the configuration
//! source with the supervisor-owned [`JobState`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::policies::Backoff;

/// Unix timestamp in whole seconds.
pub type Timestamp = u64;

/// Operating-system process id.
pub type Pid = i32;

/// Opaque, comparable job identifier supplied by the configuration source.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates an id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrowed view of the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_string()))
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for JobId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// Opaque worker-specific configuration handed to [`Worker::start`](crate::Worker::start).
pub type WorkerConfig = serde_json::Map<String, serde_json::Value>;

/// Validated job configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Descriptive name.
    pub name: String,
    /// Registered worker implementation identifier.
    pub worker_class: String,
    /// Worker-specific configuration.
    pub worker_config: WorkerConfig,
    /// Time of last modification (unix seconds).
    pub mtime: Timestamp,
    /// A run shorter than this counts as a crash-loop signal.
    pub short_run_time_seconds: u64,
    /// Grace period between SIGTERM and SIGKILL.
    pub shutdown_timeout_seconds: u64,
}

impl JobConfig {
    /// Default for [`JobConfig::short_run_time_seconds`].
    pub const DEFAULT_SHORT_RUN_TIME_SECONDS: u64 = 5;
    /// Default for [`JobConfig::shutdown_timeout_seconds`].
    pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;

    /// Minimal config with defaults, mostly useful in tests and demos.
    pub fn new(name: impl Into<String>, worker_class: impl Into<String>, mtime: Timestamp) -> Self {
        Self {
            name: name.into(),
            worker_class: worker_class.into(),
            worker_config: WorkerConfig::new(),
            mtime,
            short_run_time_seconds: Self::DEFAULT_SHORT_RUN_TIME_SECONDS,
            shutdown_timeout_seconds: Self::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        }
    }
}

/// Configuration-diff status since the last applied configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CfState {
    /// Present before and now, `mtime` did not advance.
    Unchanged,
    /// First reported by this poll.
    Added,
    /// No longer reported; will never be started again.
    Removed,
    /// `mtime` advanced.
    Updated,
}

/// Supervisor-owned runtime state of a job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobState {
    /// Worker process id while believed alive.
    pub pid: Option<Pid>,
    /// When the current (or last) process was started.
    pub started_at: Option<Timestamp>,
    /// Earliest time the job may be started again.
    pub restart_at: Option<Timestamp>,
    /// Restart delay generator; its current interval is the job's backoff interval.
    pub backoff: Backoff,
    /// Configuration-diff status.
    pub cf_state: CfState,
    /// Raw status of the last reaped process.
    pub last_exit_status: Option<ExitStatus>,
}

impl JobState {
    /// Current backoff interval in whole seconds (at least 1).
    pub fn backoff_interval(&self) -> u64 {
        self.backoff.current().as_secs().max(1)
    }
}

/// A configured unit of supervised work.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    /// Validated configuration.
    pub config: JobConfig,
    /// Runtime state.
    pub state: JobState,
}

/// How a reaped child ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ExitStatus {
    /// Exited normally with this code.
    Exited(i32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// Shell-style integer: the exit code, or `128 + signal`.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Exited(code) => *code,
            ExitStatus::Signaled(sig) => 128 + sig,
        }
    }

    /// True for `Exited(0)`.
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {code}"),
            ExitStatus::Signaled(sig) => write!(f, "signal {sig}"),
        }
    }
}

/// Validated configuration set keyed by job id.
pub type Configuration = BTreeMap<JobId, JobConfig>;

/// Source of "now" for the job store.
pub trait Clock: Send + Sync + 'static {
    /// Current unix time in whole seconds.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    /// Clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    /// Moves time forward.
    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jumps to an absolute time.
    pub fn set(&self, now: Timestamp) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_parses_trimmed() {
        let id: JobId = " 42 ".parse().unwrap();
        assert_eq!(id, JobId::from(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_exit_status_code() {
        assert_eq!(ExitStatus::Exited(3).code(), 3);
        assert_eq!(ExitStatus::Signaled(9).code(), 137);
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Signaled(15).success());
    }

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(7);
        assert_eq!(clock.now(), 7);
    }

    #[test]
    fn test_job_config_serializes_camel_case() {
        let cfg = JobConfig::new("seven", "mock", 100);
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["workerClass"], "mock");
        assert_eq!(json["shortRunTimeSeconds"], 5);
        assert_eq!(json["shutdownTimeoutSeconds"], 10);
    }
}
