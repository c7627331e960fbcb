//! Error types used by the procvisor runtime, its child processes and plug-ins.
//!
//! - [`RuntimeError`]: conditions that end the supervisor itself.
//! - [`WorkerError`]: raised by worker implementations inside a worker process.
//! - [`SourceError`]: raised by configuration sources (polling errors, non-fatal).
//! - [`ValidationError`]: a job configuration was rejected.
//! - [`IpcError`]: a message exchange over a Unix domain socket failed.
//! - [`LaunchError`]: a child process could not be spawned or signalled.
//!
//! Every enum provides `as_label` (stable snake_case for logs).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::ExitCode;

/// # Errors that end the supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No directory is available for the configuration socket.
    #[error("no usable location for the {name} socket; tried {tried:?}")]
    SocketUnavailable {
        /// Socket file name.
        name: &'static str,
        /// Candidate directories.
        tried: Vec<PathBuf>,
    },

    /// The configuration process kept dying faster than its minimum run time.
    #[error("configuration process failed after {retries} retries, giving up")]
    ConfigProcessExhausted {
        /// Number of retries made.
        retries: u32,
    },

    /// The freshly launched configuration process never reported readiness.
    #[error("configuration process did not signal readiness within {timeout:?}")]
    ConfigProcessNotReady {
        /// Handshake timeout.
        timeout: Duration,
    },

    /// Installing signal listeners failed.
    #[error("cannot install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    /// The child environment handed over by the supervisor is malformed.
    #[error("invalid child environment: {0}")]
    ChildEnvironment(String),

    /// A setting has an unusable value.
    #[error("invalid value for {name}: {value:?}")]
    InvalidSetting {
        /// Setting (environment variable) name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// The configuration source could not be set up.
    #[error("configuration source unusable: {0}")]
    Source(#[from] SourceError),

    /// Any other I/O failure in the supervisor.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    ///
    /// let err = RuntimeError::ConfigProcessExhausted { retries: 5 };
    /// assert_eq!(err.as_label(), "runtime_config_process_exhausted");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::SocketUnavailable { .. } => "runtime_socket_unavailable",
            RuntimeError::ConfigProcessExhausted { .. } => "runtime_config_process_exhausted",
            RuntimeError::ConfigProcessNotReady { .. } => "runtime_config_process_not_ready",
            RuntimeError::Signals(_) => "runtime_signals",
            RuntimeError::ChildEnvironment(_) => "runtime_child_environment",
            RuntimeError::InvalidSetting { .. } => "runtime_invalid_setting",
            RuntimeError::Source(_) => "runtime_source",
            RuntimeError::Io(_) => "runtime_io",
        }
    }

    /// Process exit code the supervisor should terminate with.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RuntimeError::SocketUnavailable { .. } => ExitCode::Unavailable,
            RuntimeError::InvalidSetting { .. } | RuntimeError::Source(_) => ExitCode::Config,
            _ => ExitCode::Software,
        }
    }
}

/// # Errors produced by worker implementations.
///
/// The supervisor never sees these directly; a worker process logs them and
/// exits with a non-zero status, which feeds the restart backoff.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A start or cycle failed; the process exits and will be restarted.
    #[error("worker failed: {reason}")]
    Fail {
        /// The underlying error message.
        reason: String,
    },

    /// Non-recoverable error; the process exits with the same status.
    #[error("fatal worker error: {reason}")]
    Fatal {
        /// The underlying error message.
        reason: String,
    },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Fail { .. } => "worker_failed",
            WorkerError::Fatal { .. } => "worker_fatal",
        }
    }
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SourceError {
    /// Reading the backing store failed.
    #[error("cannot read configuration from {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backing store held something that is not a job mapping.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The cluster (shard) configuration is unusable.
    #[error(transparent)]
    Cluster(#[from] ClusterConfigurationError),

    /// Source-specific failure.
    #[error("configuration source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SourceError::Read { .. } => "source_read",
            SourceError::Parse(_) => "source_parse",
            SourceError::Cluster(_) => "source_cluster",
            SourceError::Unavailable(_) => "source_unavailable",
        }
    }
}

/// # Invalid shard assignment.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClusterConfigurationError {
    /// Cluster configuration file could not be read.
    #[error("error reading cluster configuration file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Cluster configuration file is not valid JSON.
    #[error("error parsing cluster configuration file {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is missing or not a non-negative integer.
    #[error("{field} is not an integer value: {value:?}")]
    NotAnInteger {
        /// Which setting.
        field: String,
        /// What was found.
        value: Option<String>,
    },

    /// The instance number does not fit the number of instances.
    #[error("invalid cluster config: number of instances = {number_of_instances}, instance number = {instance_number}")]
    OutOfRange {
        /// Configured instance.
        instance_number: u32,
        /// Configured cluster size.
        number_of_instances: u32,
    },
}

/// # Rejection of a single job configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("job {job} rejected: {}", describe(.fields))]
pub struct ValidationError {
    /// Job id as reported by the source.
    pub job: String,
    /// One entry per failing field.
    pub fields: Vec<FieldError>,
}

/// What is wrong with one field of a job configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Field name as it appears in the configuration.
    pub field: &'static str,
    /// What went wrong.
    pub kind: FieldErrorKind,
    /// Human-readable description of a valid value.
    pub description: &'static str,
}

/// Kind of field failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldErrorKind {
    /// The field is absent.
    Missing,
    /// The field is present but has the wrong type or range.
    Invalid,
}

impl ValidationError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        "job_config_invalid"
    }

    /// True if the given field is among the failures.
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }
}

fn describe(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| {
            let what = match f.kind {
                FieldErrorKind::Missing => "field missing",
                FieldErrorKind::Invalid => "invalid data",
            };
            format!("{}: {what} ({})", f.field, f.description)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// # Errors produced by the message channels.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum IpcError {
    /// Could not connect to the peer socket.
    #[error("could not connect to socket {path}: {source}")]
    Connect {
        /// Socket path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing or reading a frame failed.
    #[error("message exchange failed: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection before replying.
    #[error("connection closed before a reply was received")]
    Closed,

    /// A frame was not valid UTF-8.
    #[error("message is not valid UTF-8")]
    Encoding,

    /// Peer replied, but not with an acknowledgment.
    #[error("peer did not acknowledge: {0}")]
    Rejected(String),

    /// The payload could not be serialized.
    #[error("cannot serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl IpcError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            IpcError::Connect { .. } => "ipc_connect",
            IpcError::Io(_) => "ipc_io",
            IpcError::Closed => "ipc_closed",
            IpcError::Encoding => "ipc_encoding",
            IpcError::Rejected(_) => "ipc_rejected",
            IpcError::Serialize(_) => "ipc_serialize",
        }
    }
}

/// # Errors produced when spawning or signalling children.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The child process could not be created.
    #[error("cannot spawn {role} process: {source}")]
    Spawn {
        /// Role of the child (`worker` / `config`).
        role: &'static str,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The job configuration could not be handed over.
    #[error("cannot encode job configuration: {0}")]
    Encode(#[from] serde_json::Error),

    /// Delivering a signal failed.
    #[error("cannot send {signal} to pid {pid}: {source}")]
    Signal {
        /// Target pid.
        pid: i32,
        /// Signal name.
        signal: &'static str,
        /// OS error.
        #[source]
        source: nix::errno::Errno,
    },
}

impl LaunchError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            LaunchError::Spawn { .. } => "launch_spawn",
            LaunchError::Encode(_) => "launch_encode",
            LaunchError::Signal { .. } => "launch_signal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_field() {
        let err = ValidationError {
            job: "7".into(),
            fields: vec![
                FieldError {
                    field: "name",
                    kind: FieldErrorKind::Missing,
                    description: "descriptive job name, must be a string",
                },
                FieldError {
                    field: "mtime",
                    kind: FieldErrorKind::Invalid,
                    description: "time of last modification, a UNIX timestamp",
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("job 7 rejected"));
        assert!(msg.contains("name: field missing"));
        assert!(msg.contains("mtime: invalid data"));
        assert!(err.has_field("mtime"));
        assert!(!err.has_field("workerClass"));
    }

    #[test]
    fn test_socket_unavailable_maps_to_unavailable_exit() {
        let err = RuntimeError::SocketUnavailable {
            name: "config",
            tried: vec![],
        };
        assert_eq!(err.exit_code(), ExitCode::Unavailable);
        assert_eq!(
            RuntimeError::ConfigProcessExhausted { retries: 5 }.exit_code(),
            ExitCode::Software
        );
    }
}
