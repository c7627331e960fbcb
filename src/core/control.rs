//! # Operator control commands.
//!
//! Text protocol spoken on the `control` socket:
//!
//! | Command               | Response                                          |
//! |-----------------------|---------------------------------------------------|
//! | `help`                | usage                                             |
//! | `status`, `jsonstatus`| JSON dump of the job store keyed by id            |
//! | `restart <id>`        | scheduling result                                 |
//! | `reload`              | confirmation; the config process is sent SIGHUP   |
//! | `metrics`             | Prometheus text exposition                        |
//! | `stop`                | confirmation; the supervisor starts draining      |
//!
//! Parsing and rendering live here; the supervisor loop carries out the effects.

use std::fmt::Write as _;

use crate::jobs::{JobId, JobStore};

/// Prefix of usage and confirmation responses.
pub const PREFIX: &str = "procvisor: ";

const USAGE: &str = "valid messages:
  help                 description of valid messages
  status, jsonstatus   information about running worker processes
  restart <job_id>     restart process with job id <job_id>
  reload               reload configuration
  metrics              job metrics in Prometheus text format
  stop                 shut down procvisor and all worker processes";

/// A parsed control message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    /// Usage text.
    Help,
    /// Job store dump.
    Status,
    /// Graceful shutdown.
    Stop,
    /// On-demand restart; `None` when the id argument is missing.
    Restart(Option<JobId>),
    /// Immediate configuration re-poll.
    Reload,
    /// Prometheus metrics.
    Metrics,
    /// Anything else (the raw message).
    Unknown(String),
}

impl ControlCommand {
    /// Parses a message: first word is the command, second the argument.
    pub fn parse(message: &str) -> Self {
        let mut words = message.split_whitespace();
        match words.next() {
            Some("help") => ControlCommand::Help,
            Some("status") | Some("jsonstatus") => ControlCommand::Status,
            Some("stop") => ControlCommand::Stop,
            Some("restart") => ControlCommand::Restart(words.next().map(JobId::from)),
            Some("reload") => ControlCommand::Reload,
            Some("metrics") => ControlCommand::Metrics,
            _ => ControlCommand::Unknown(message.to_string()),
        }
    }
}

/// Response to `help`.
pub fn help() -> String {
    format!("{PREFIX}{USAGE}")
}

/// Response to an unknown message.
pub fn unknown(message: &str) -> String {
    format!("{PREFIX}'{message}' is not a valid message. {USAGE}")
}

/// Response to `stop`.
pub fn stopping() -> String {
    format!("{PREFIX}Shutting down process manager")
}

/// Response to `restart` without an id.
pub fn restart_needs_id() -> String {
    format!("{PREFIX}restart requires a job id argument")
}

/// Response to `reload`.
pub fn reload_scheduled() -> String {
    "Scheduled immediate configuration reload".to_string()
}

/// Response to `status`: the job store as JSON.
pub fn status(store: &JobStore) -> String {
    serde_json::to_string(&store.status()).unwrap_or_else(|e| format!("{PREFIX}cannot encode status: {e}"))
}

/// Response to `metrics`.
///
/// ```text
/// procvisor_job_count 3
/// procvisor_inactive_job_count 1
/// procvisor_job_backoff_seconds{id="7",name="seven",last_exit_status="1"} 4
/// ```
/// A backoff sample is emitted for every job whose `restart_at` lies after its `started_at`.
pub fn metrics(store: &JobStore) -> String {
    let total = store.len();
    let active = store.running_count();
    let mut out = String::new();
    let _ = writeln!(out, "procvisor_job_count {total}");
    let _ = writeln!(out, "procvisor_inactive_job_count {}", total.saturating_sub(active));

    for (id, job) in store.jobs() {
        let (Some(started), Some(restart)) = (job.state.started_at, job.state.restart_at) else {
            continue;
        };
        if restart <= started {
            continue;
        }
        let mut labels = format!("id=\"{}\",name=\"{}\"", escape(id.as_str()), escape(&job.config.name));
        if let Some(status) = job.state.last_exit_status {
            let _ = write!(labels, ",last_exit_status=\"{}\"", status.code());
        }
        let _ = writeln!(out, "procvisor_job_backoff_seconds{{{labels}}} {}", restart - started);
    }
    out
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
