//! # Worker process runner.
//!
//! Executed inside each worker child process:
//!
//! ```text
//! WorkerProcess::run(token)
//!   ├─► worker.start(config)            (once; error → exit 70)
//!   └─► loop:
//!         ├─ token cancelled?            → exit 0   (SIGTERM / SIGINT)
//!         ├─ worker.cycle()              (error → exit 70)
//!         ├─ parent pid changed?         → exit 2   (orphaned)
//!         └─ sleep(interval) | cancelled
//! ```
//!
//! ## Rules
//! - A cycle in progress is never interrupted; cancellation is observed between cycles.
//! - An orphaned worker exits without finishing anything else.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::{ExitCode, parent_pid};
use crate::jobs::{JobId, Pid, WorkerConfig};
use crate::workers::worker::Worker;

/// Drives one worker inside its own process.
pub struct WorkerProcess {
    job: JobId,
    worker: Box<dyn Worker>,
    supervisor_pid: Pid,
    interval: Duration,
    parent: fn() -> Pid,
}

impl WorkerProcess {
    /// Creates a runner for `job`, expecting `supervisor_pid` to stay our parent.
    pub fn new(job: JobId, worker: Box<dyn Worker>, supervisor_pid: Pid, interval: Duration) -> Self {
        Self {
            job,
            worker,
            supervisor_pid,
            interval,
            parent: parent_pid,
        }
    }

    /// Overrides how the current parent pid is obtained.
    pub fn with_parent_lookup(mut self, lookup: fn() -> Pid) -> Self {
        self.parent = lookup;
        self
    }

    /// Runs `start` then `cycle` until cancelled or orphaned; returns the process exit code.
    pub async fn run(mut self, config: &WorkerConfig, token: CancellationToken) -> ExitCode {
        info!(job = %self.job, supervisor = self.supervisor_pid, "worker process starting");
        if let Err(e) = self.worker.start(config).await {
            error!(job = %self.job, label = e.as_label(), error = %e, "worker start failed");
            return ExitCode::Software;
        }

        loop {
            if token.is_cancelled() {
                info!(job = %self.job, "shutdown requested, exiting");
                return ExitCode::Success;
            }

            if let Err(e) = self.worker.cycle().await {
                error!(job = %self.job, label = e.as_label(), error = %e, "worker cycle failed");
                return ExitCode::Software;
            }

            if (self.parent)() != self.supervisor_pid {
                warn!(job = %self.job, "parent pid changed, exiting");
                return ExitCode::ParentChanged;
            }

            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        cycles: Arc<AtomicU32>,
        cancel_after: u32,
        token: CancellationToken,
    }

    #[async_trait]
    impl Worker for Counting {
        async fn start(&mut self, _config: &WorkerConfig) -> Result<(), WorkerError> {
            Ok(())
        }

        async fn cycle(&mut self) -> Result<(), WorkerError> {
            let n = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.cancel_after {
                self.token.cancel();
            }
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Worker for Broken {
        async fn start(&mut self, _config: &WorkerConfig) -> Result<(), WorkerError> {
            Err(WorkerError::Fatal {
                reason: "no database".into(),
            })
        }

        async fn cycle(&mut self) -> Result<(), WorkerError> {
            Ok(())
        }
    }

    fn parent_is_one() -> Pid {
        1
    }

    #[tokio::test]
    async fn test_cancellation_exits_successfully_between_cycles() {
        let token = CancellationToken::new();
        let cycles = Arc::new(AtomicU32::new(0));
        let worker = Counting {
            cycles: cycles.clone(),
            cancel_after: 3,
            token: token.clone(),
        };
        let code = WorkerProcess::new(JobId::from(1), Box::new(worker), 1, Duration::from_millis(1))
            .with_parent_lookup(parent_is_one)
            .run(&WorkerConfig::new(), token)
            .await;
        assert_eq!(code, ExitCode::Success);
        assert_eq!(cycles.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_orphan_exits_with_parent_changed() {
        let token = CancellationToken::new();
        let worker = Counting {
            cycles: Arc::new(AtomicU32::new(0)),
            cancel_after: u32::MAX,
            token: token.clone(),
        };
        let code = WorkerProcess::new(JobId::from(1), Box::new(worker), 4242, Duration::from_millis(1))
            .with_parent_lookup(parent_is_one)
            .run(&WorkerConfig::new(), token)
            .await;
        assert_eq!(code, ExitCode::ParentChanged);
    }

    #[tokio::test]
    async fn test_failed_start_exits_with_software_error() {
        let code = WorkerProcess::new(JobId::from(1), Box::new(Broken), 1, Duration::from_millis(1))
            .with_parent_lookup(parent_is_one)
            .run(&WorkerConfig::new(), CancellationToken::new())
            .await;
        assert_eq!(code, ExitCode::Software);
    }
}
