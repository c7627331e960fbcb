//! # Meta-supervision of the configuration process.
//!
//! There is at most one configuration process. Its restarts follow the same
//! backoff idea as jobs, keyed on run time since the last start:
//!
//! ```text
//! exited after >= min_run_time ──► retries = 0, restart immediately
//! exited sooner                ──► restart_at = now + backoff.next(retries), retries += 1
//! retries > max_retries        ──► give up (the supervisor shuts down)
//! ```

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::core::config::ConfigProcessPolicy;
use crate::jobs::Pid;

/// What the supervisor should do about the configuration process this iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigProcessAction {
    /// It is running, or its backoff has not elapsed.
    Wait,
    /// Launch it now.
    Start,
    /// Retries exhausted.
    GiveUp,
}

/// Tracks the configuration process pid, retries and backoff.
#[derive(Debug)]
pub struct ConfigProcessManager {
    policy: ConfigProcessPolicy,
    pid: Option<Pid>,
    retries: u32,
    last_start: Option<Instant>,
    restart_at: Option<Instant>,
    last_delay: Option<Duration>,
    term_sent_at: Option<Instant>,
    killed: bool,
}

impl ConfigProcessManager {
    /// Manager with no process and no retries.
    pub fn new(policy: ConfigProcessPolicy) -> Self {
        Self {
            policy,
            pid: None,
            retries: 0,
            last_start: None,
            restart_at: None,
            last_delay: None,
            term_sent_at: None,
            killed: false,
        }
    }

    /// Live configuration process, if any.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Consecutive short runs so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Backoff applied before the upcoming (or latest) start.
    pub fn last_delay(&self) -> Option<Duration> {
        self.last_delay
    }

    /// Decides whether to (re)start the process; records the start time on `Start`.
    pub fn next_action(&mut self, now: Instant) -> ConfigProcessAction {
        if self.pid.is_some() {
            return ConfigProcessAction::Wait;
        }
        if self.retries > self.policy.max_retries {
            warn!(max_retries = self.policy.max_retries, "config process failed too often, giving up");
            return ConfigProcessAction::GiveUp;
        }
        if self.restart_at.is_some_and(|at| at > now) {
            return ConfigProcessAction::Wait;
        }
        self.last_start = Some(now);
        ConfigProcessAction::Start
    }

    /// Records the pid of a freshly launched process.
    pub fn on_started(&mut self, pid: Pid) {
        self.pid = Some(pid);
        self.term_sent_at = None;
        self.killed = false;
    }

    /// Records that the process is gone (reaped, or never came up) and schedules the next start.
    ///
    /// Returns the backoff delay, `None` if it ran long enough to restart right away.
    pub fn on_exited(&mut self, now: Instant) -> Option<Duration> {
        self.pid = None;
        self.term_sent_at = None;
        let ran_long_enough = self
            .last_start
            .is_none_or(|start| now.saturating_duration_since(start) >= self.policy.min_run_time);
        if ran_long_enough {
            self.retries = 0;
            self.restart_at = None;
            self.last_delay = None;
            return None;
        }
        let delay = self.policy.backoff.next(self.retries);
        info!(retry = self.retries, delay_secs = delay.as_secs(), "backing off on config process spawn");
        self.restart_at = Some(now + delay);
        self.last_delay = Some(delay);
        self.retries += 1;
        Some(delay)
    }

    /// True if `pid` is the live configuration process.
    pub fn owns(&self, pid: Pid) -> bool {
        self.pid == Some(pid)
    }

    /// Records that SIGTERM was sent.
    pub fn mark_terminating(&mut self, now: Instant) {
        if self.term_sent_at.is_none() {
            self.term_sent_at = Some(now);
        }
    }

    /// True once SIGTERM was sent.
    pub fn is_terminating(&self) -> bool {
        self.term_sent_at.is_some()
    }

    /// Pid to SIGKILL because it ignored SIGTERM for `term_timeout`; reported once.
    pub fn overdue_kill(&mut self, now: Instant) -> Option<Pid> {
        let sent = self.term_sent_at?;
        let pid = self.pid?;
        if self.killed || now.saturating_duration_since(sent) < self.policy.term_timeout {
            return None;
        }
        self.killed = true;
        Some(pid)
    }
}
