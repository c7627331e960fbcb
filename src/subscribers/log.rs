//! # LogWriter: lifecycle events as structured `tracing` records.
//!
//! Job failures and force-kills are `warn`, subscriber trouble is `error`,
//! everything else is `info`. Fields: `job`, `pid`, `status`, `delay_ms`,
//! `attempt`, `reason`.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let job = e.job.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::JobAdded => info!(job, name = reason, "job added"),
            EventKind::JobUpdated => info!(job, name = reason, "job updated"),
            EventKind::JobRemoved => info!(job, "job removed"),
            EventKind::JobPurged => info!(job, "job purged"),
            EventKind::JobRejected => warn!(job, reason, "job configuration rejected"),
            EventKind::JobStarted => info!(job, pid = e.pid, "job started"),
            EventKind::JobStartFailed => warn!(job, reason, "job start failed"),
            EventKind::JobStopping => info!(job, pid = e.pid, "job stopping"),
            EventKind::JobKilled => warn!(job, pid = e.pid, "job did not stop in time, killed"),
            EventKind::JobExited => {
                let status = e.status.map(|s| s.to_string());
                match e.status {
                    Some(s) if s.success() => {
                        info!(job, pid = e.pid, status, delay_ms = e.delay_ms, "job exited")
                    }
                    _ => warn!(job, pid = e.pid, status, delay_ms = e.delay_ms, "job exited"),
                }
            }
            EventKind::RestartRequested => info!(job, reason, "restart requested"),
            EventKind::ConfigProcessStarted => info!(
                pid = e.pid,
                attempt = e.attempt,
                delay_ms = e.delay_ms,
                "configuration process started"
            ),
            EventKind::ConfigProcessReady => info!(pid = e.pid, "configuration process ready"),
            EventKind::ConfigProcessExited => warn!(
                pid = e.pid,
                status = e.status.map(|s| s.to_string()),
                "configuration process exited"
            ),
            EventKind::ConfigApplied => info!(reason, "configuration applied"),
            EventKind::ShutdownRequested => info!(reason, "shutdown requested"),
            EventKind::Drained => info!("all processes stopped"),
            EventKind::SubscriberPanicked => error!(reason, "subscriber panicked"),
            EventKind::SubscriberOverflow => error!(reason, "subscriber dropped an event"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
