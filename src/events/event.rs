//! # Lifecycle events emitted by the supervisor.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Job events**: configuration diff and process lifecycle of one job
//! - **Configuration process events**: meta-supervision of the config child
//! - **Supervisor events**: shutdown and draining
//! - **Subscriber events**: fan-out health (overflow, panic)
//!
//! The [`Event`] struct carries optional metadata: job id, pid, exit status,
//! delays and a human-readable reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{Event, EventKind, ExitStatus};
//!
//! let ev = Event::new(EventKind::JobExited)
//!     .with_job("7")
//!     .with_pid(4242)
//!     .with_status(ExitStatus::Exited(1))
//!     .with_delay(Duration::from_secs(2));
//!
//! assert_eq!(ev.kind, EventKind::JobExited);
//! assert_eq!(ev.job.as_deref(), Some("7"));
//! assert_eq!(ev.delay_ms, Some(2000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::jobs::{ExitStatus, Pid};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Job configuration ===
    /// Job reported for the first time.
    ///
    /// Sets: `job`, `reason` (job name)
    JobAdded,

    /// Job `mtime` advanced.
    ///
    /// Sets: `job`, `reason` (job name)
    JobUpdated,

    /// Job no longer reported by the configuration source.
    ///
    /// Sets: `job`
    JobRemoved,

    /// Removed job deleted from the store.
    ///
    /// Sets: `job`
    JobPurged,

    /// Job config failed validation and was dropped.
    ///
    /// Sets: `job`, `reason` (field errors)
    JobRejected,

    // === Job processes ===
    /// Worker process launched.
    ///
    /// Sets: `job`, `pid`
    JobStarted,

    /// Worker process could not be launched.
    ///
    /// Sets: `job`, `reason`
    JobStartFailed,

    /// SIGTERM sent.
    ///
    /// Sets: `job`, `pid`
    JobStopping,

    /// Graceful stop timed out; SIGKILL sent.
    ///
    /// Sets: `job`, `pid`
    JobKilled,

    /// Worker process reaped.
    ///
    /// Sets: `job`, `pid`, `status`, `delay_ms` (time until it may start again)
    JobExited,

    /// Operator requested a restart.
    ///
    /// Sets: `job`, `reason` (response text)
    RestartRequested,

    // === Configuration process ===
    /// Configuration process launched.
    ///
    /// Sets: `pid`, `attempt` (retry count), `delay_ms` (backoff applied before launch)
    ConfigProcessStarted,

    /// Configuration process signalled readiness.
    ///
    /// Sets: `pid`
    ConfigProcessReady,

    /// Configuration process reaped.
    ///
    /// Sets: `pid`, `status`
    ConfigProcessExited,

    /// New configuration applied to the job store.
    ///
    /// Sets: `reason` (summary)
    ConfigApplied,

    // === Supervisor ===
    /// Shutdown requested (signal or `stop` command).
    ///
    /// Sets: `reason`
    ShutdownRequested,

    /// Every child has been reaped; the supervisor is about to exit.
    Drained,

    // === Subscribers ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason` (subscriber name and panic info)
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason`
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Job id, if applicable.
    pub job: Option<Arc<str>>,
    /// Process id, if applicable.
    pub pid: Option<Pid>,
    /// Exit status of a reaped process.
    pub status: Option<ExitStatus>,
    /// Delay in milliseconds (backoff, restart).
    pub delay_ms: Option<u64>,
    /// Retry / attempt counter.
    pub attempt: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            job: None,
            pid: None,
            status: None,
            delay_ms: None,
            attempt: None,
            reason: None,
        }
    }

    /// Attaches a job id.
    #[inline]
    pub fn with_job(mut self, job: impl AsRef<str>) -> Self {
        self.job = Some(Arc::from(job.as_ref()));
        self
    }

    /// Attaches a pid.
    #[inline]
    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an exit status.
    #[inline]
    pub fn with_status(mut self, status: ExitStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Attaches an attempt counter.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::JobAdded);
        let b = Event::new(EventKind::JobAdded);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_subscriber_events_name_the_subscriber() {
        let ev = Event::subscriber_overflow("audit", "full");
        assert_eq!(ev.kind, EventKind::SubscriberOverflow);
        assert_eq!(ev.reason.as_deref(), Some("subscriber=audit reason=full"));
    }
}
