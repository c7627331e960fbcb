//! # Supervisor configuration.
//!
//! Provides [`SupervisorConfig`], the knobs of the supervisor loop, the
//! configuration process and the worker processes.
//!
//! Config is used in three places:
//! 1. **Supervisor**: `Supervisor::new(config, ...)`
//! 2. **Configuration process**: poll interval (handed over through the environment)
//! 3. **Worker processes**: cycle interval (same)
//!
//! ## Sentinel values
//! - `config_poll_interval = 0s` → poll continuously (no sleep between polls)
//! - `tick = 0s` → clamped to 100ms so the loop never spins
//!
//! ## Environment overrides ([`SupervisorConfig::from_env`])
//! | Variable                         | Field                   |
//! |----------------------------------|-------------------------|
//! | `PROCVISOR_TICK_SECONDS`         | `tick`                  |
//! | `PROCVISOR_CONFIG_POLL_SECONDS`  | `config_poll_interval`  |
//! | `PROCVISOR_WORKER_CYCLE_SECONDS` | `worker_cycle_interval` |
//! | `PROCVISOR_SOCKET_DIR`           | `socket_dirs` (single)  |

use std::path::PathBuf;
use std::time::Duration;

use crate::error::RuntimeError;
use crate::ipc::default_socket_dirs;
use crate::policies::{BackoffPolicy, JitterPolicy};

/// Environment variable overriding [`SupervisorConfig::tick`].
pub const ENV_TICK_SECONDS: &str = "PROCVISOR_TICK_SECONDS";
/// Environment variable overriding [`SupervisorConfig::config_poll_interval`].
pub const ENV_CONFIG_POLL_SECONDS: &str = "PROCVISOR_CONFIG_POLL_SECONDS";
/// Environment variable overriding [`SupervisorConfig::worker_cycle_interval`].
pub const ENV_WORKER_CYCLE_SECONDS: &str = "PROCVISOR_WORKER_CYCLE_SECONDS";
/// Environment variable overriding [`SupervisorConfig::socket_dirs`].
pub const ENV_SOCKET_DIR: &str = "PROCVISOR_SOCKET_DIR";

const MIN_TICK: Duration = Duration::from_millis(100);

/// Restart policy of the configuration process.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfigProcessPolicy {
    /// Restarts allowed before the supervisor gives up.
    pub max_retries: u32,
    /// A run at least this long resets the retry counter.
    pub min_run_time: Duration,
    /// Delay before restart number `retries` is `backoff.next(retries)`.
    pub backoff: BackoffPolicy,
    /// Grace period between SIGTERM and SIGKILL when stopping it.
    pub term_timeout: Duration,
}

impl Default for ConfigProcessPolicy {
    /// - `max_retries = 5`
    /// - `min_run_time = 40s`
    /// - `backoff`: first 1s, ×2, max 300s
    /// - `term_timeout = 5s`
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_run_time: Duration::from_secs(40),
            backoff: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(300),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
            term_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for the supervisor runtime.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Upper bound of the end-of-iteration sleep.
    pub tick: Duration,

    /// How often the configuration process polls its source.
    pub config_poll_interval: Duration,

    /// How long to wait for a fresh configuration process to signal readiness.
    pub config_ready_timeout: Duration,

    /// Meta-supervision of the configuration process.
    pub config_process: ConfigProcessPolicy,

    /// Per-job restart backoff.
    pub job_backoff: BackoffPolicy,

    /// Pause between worker cycles inside worker processes.
    pub worker_cycle_interval: Duration,

    /// Candidate directories for the `config` and `control` sockets, in order.
    pub socket_dirs: Vec<PathBuf>,

    /// Event bus ring buffer size (min 1).
    pub bus_capacity: usize,
}

impl Default for SupervisorConfig {
    /// - `tick = 2s`
    /// - `config_poll_interval = 30s`
    /// - `config_ready_timeout = 10s`
    /// - `config_process = ConfigProcessPolicy::default()`
    /// - `job_backoff = BackoffPolicy::default()` (1s, ×2, max 6h)
    /// - `worker_cycle_interval = 2s`
    /// - `socket_dirs = /run/procvisor, /run/user/<euid>/procvisor`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(2),
            config_poll_interval: Duration::from_secs(30),
            config_ready_timeout: Duration::from_secs(10),
            config_process: ConfigProcessPolicy::default(),
            job_backoff: BackoffPolicy::default(),
            worker_cycle_interval: Duration::from_secs(2),
            socket_dirs: default_socket_dirs(),
            bus_capacity: 1024,
        }
    }
}

impl SupervisorConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RuntimeError> {
        let mut cfg = Self::default();
        if let Some(d) = seconds(&lookup, ENV_TICK_SECONDS)? {
            cfg.tick = d;
        }
        if let Some(d) = seconds(&lookup, ENV_CONFIG_POLL_SECONDS)? {
            cfg.config_poll_interval = d;
        }
        if let Some(d) = seconds(&lookup, ENV_WORKER_CYCLE_SECONDS)? {
            cfg.worker_cycle_interval = d;
        }
        if let Some(dir) = lookup(ENV_SOCKET_DIR).filter(|s| !s.is_empty()) {
            cfg.socket_dirs = vec![PathBuf::from(dir)];
        }
        Ok(cfg)
    }

    /// Loop sleep bound, never below 100ms.
    #[inline]
    pub fn tick_clamped(&self) -> Duration {
        self.tick.max(MIN_TICK)
    }

    /// Sleep between configuration polls as an `Option` (`None` = poll continuously).
    #[inline]
    pub fn poll_pause(&self) -> Option<Duration> {
        if self.config_poll_interval.is_zero() {
            None
        } else {
            Some(self.config_poll_interval)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, RuntimeError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|s| Some(Duration::from_secs(s)))
            .map_err(|_| RuntimeError::InvalidSetting { name, value: raw }),
    }
}
