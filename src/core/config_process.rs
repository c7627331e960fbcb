//! # Configuration process runner.
//!
//! Runs inside the configuration child process:
//!
//! ```text
//! ConfigurationProcess::run(reload, token)
//!   ├─► connect to the config socket        (failure → exit 69)
//!   ├─► SIGUSR1 → supervisor                ("ready")
//!   └─► loop:
//!         ├─ token cancelled?               → exit 0
//!         ├─ parent pid changed?            → disconnect, exit 2
//!         ├─ poll due? load_configuration()
//!         │     └─ fresher than last? push JSON, expect "ok"
//!         └─ sleep until next poll | SIGHUP (poll now) | cancelled
//! ```
//!
//! A configuration is fresher if it has an id not seen before, a larger
//! `mtime` for a known id, or lacks an id that was there before. A failed push
//! is logged and not retried until the source changes again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::ExitCode;
use crate::core::spawn::{parent_pid, send_signal};
use crate::error::{IpcError, LaunchError};
use crate::ipc::{MessageClient, RESP_OK};
use crate::jobs::{Pid, RawConfiguration};
use crate::source::ConfigurationSource;

type ReadySignal = fn(Pid) -> Result<(), LaunchError>;

fn sigusr1(pid: Pid) -> Result<(), LaunchError> {
    send_signal(pid, Signal::SIGUSR1)
}

/// Polls a [`ConfigurationSource`] and pushes changes to the supervisor.
pub struct ConfigurationProcess<S> {
    source: S,
    client: MessageClient,
    supervisor_pid: Pid,
    poll_pause: Option<Duration>,
    parent: fn() -> Pid,
    ready: ReadySignal,
    config: RawConfiguration,
    last_poll: Option<Instant>,
}

impl<S: ConfigurationSource> ConfigurationProcess<S> {
    /// Runner pushing to `socket`; `poll_pause = None` polls continuously.
    pub fn new(source: S, socket: impl Into<PathBuf>, supervisor_pid: Pid, poll_pause: Option<Duration>) -> Self {
        Self {
            source,
            client: MessageClient::new(socket),
            supervisor_pid,
            poll_pause,
            parent: parent_pid,
            ready: sigusr1,
            config: RawConfiguration::new(),
            last_poll: None,
        }
    }

    /// Overrides how the current parent pid is obtained.
    pub fn with_parent_lookup(mut self, lookup: fn() -> Pid) -> Self {
        self.parent = lookup;
        self
    }

    /// Overrides how readiness is announced to the supervisor.
    pub fn with_ready_signal(mut self, ready: ReadySignal) -> Self {
        self.ready = ready;
        self
    }

    /// Runs until cancelled or orphaned; returns the process exit code.
    ///
    /// Every `reload` notification forces an immediate poll.
    pub async fn run(mut self, reload: Arc<Notify>, token: CancellationToken) -> ExitCode {
        info!(supervisor = self.supervisor_pid, socket = %self.client.path().display(), "configuration process starting");
        if let Err(e) = self.client.connect().await {
            error!(label = e.as_label(), error = %e, "cannot reach supervisor");
            return ExitCode::Unavailable;
        }
        if let Err(e) = (self.ready)(self.supervisor_pid) {
            error!(label = e.as_label(), error = %e, "cannot signal readiness");
            return ExitCode::Software;
        }

        loop {
            if token.is_cancelled() {
                info!("shutdown requested, exiting");
                self.client.disconnect();
                return ExitCode::Success;
            }
            if (self.parent)() != self.supervisor_pid {
                warn!("parent pid changed, configuration process exiting");
                self.client.disconnect();
                return ExitCode::ParentChanged;
            }

            if self.poll_due() && self.poll().await {
                match self.push().await {
                    Ok(()) => info!(jobs = self.config.len(), "configuration pushed to supervisor"),
                    Err(e) => error!(label = e.as_label(), error = %e, "could not send configuration to supervisor"),
                }
            }

            match self.poll_pause {
                None => tokio::task::yield_now().await,
                Some(pause) => {
                    let next = self.last_poll.map_or_else(Instant::now, |at| at + pause);
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = reload.notified() => {
                            info!("reload requested, polling now");
                            self.last_poll = None;
                        }
                        _ = tokio::time::sleep_until(next) => {}
                    }
                }
            }
        }
    }

    fn poll_due(&self) -> bool {
        match (self.last_poll, self.poll_pause) {
            (None, _) | (_, None) => true,
            (Some(at), Some(pause)) => at.elapsed() >= pause,
        }
    }

    /// Loads the source; returns true if the result is fresher than the last one.
    async fn poll(&mut self) -> bool {
        self.last_poll = Some(Instant::now());
        match self.source.load_configuration().await {
            Ok(fresh) => {
                if is_fresher(&self.config, &fresh) {
                    self.config = fresh;
                    true
                } else {
                    debug!("no new configuration");
                    false
                }
            }
            Err(e) => {
                error!(label = e.as_label(), error = %e, "error loading configuration from source");
                false
            }
        }
    }

    async fn push(&mut self) -> Result<(), IpcError> {
        let payload = serde_json::to_string(&self.config)?;
        let response = self.client.request(&payload).await?;
        if response == RESP_OK {
            Ok(())
        } else {
            Err(IpcError::Rejected(response))
        }
    }
}

/// True if `new` adds an id, advances an `mtime`, or drops an id relative to `old`.
pub fn is_fresher(old: &RawConfiguration, new: &RawConfiguration) -> bool {
    let mtime = |v: &Value| v.get("mtime").and_then(Value::as_u64);
    let changed = new.iter().any(|(id, job)| match old.get(id) {
        None => true,
        Some(previous) => mtime(job) > mtime(previous),
    });
    changed || old.keys().any(|id| !new.contains_key(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{Channel, MessageServer, Request, bind_in};
    use crate::jobs::{ConfigurationValidator, JobId};
    use crate::source::MockConfigurationSource;
    use crate::workers::{MockWorker, WorkerRegistry};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn raw(entries: &[(u64, u64)]) -> RawConfiguration {
        entries
            .iter()
            .map(|(id, mtime)| (JobId::from(*id), json!({"name": "job", "mtime": mtime})))
            .collect()
    }

    fn no_signal(_pid: Pid) -> Result<(), LaunchError> {
        Ok(())
    }

    fn parent_is_one() -> Pid {
        1
    }

    struct Harness {
        _dir: tempfile::TempDir,
        socket: PathBuf,
        pushes: mpsc::UnboundedReceiver<Request>,
        server: CancellationToken,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let (socket, listener) = bind_in("config", &[dir.path().to_path_buf()]).unwrap();
        let (inbox_tx, mut inbox_rx) = mpsc::channel::<Request>(8);
        let (tx, pushes) = mpsc::unbounded_channel();
        let server = CancellationToken::new();
        MessageServer::new(Channel::Config, socket.clone(), listener).serve(inbox_tx, server.clone());
        tokio::spawn(async move {
            while let Some(req) = inbox_rx.recv().await {
                let _ = tx.send(req);
            }
        });
        Harness {
            _dir: dir,
            socket,
            pushes,
            server,
        }
    }

    #[test]
    fn test_freshness() {
        assert!(!is_fresher(&raw(&[]), &raw(&[])));
        assert!(is_fresher(&raw(&[]), &raw(&[(1, 10)])));
        assert!(is_fresher(&raw(&[(1, 10)]), &raw(&[(1, 11)])));
        assert!(!is_fresher(&raw(&[(1, 10)]), &raw(&[(1, 10)])));
        assert!(!is_fresher(&raw(&[(1, 10)]), &raw(&[(1, 9)])));
        assert!(is_fresher(&raw(&[(1, 10), (2, 10)]), &raw(&[(1, 10)])));
    }

    #[tokio::test]
    async fn test_pushes_changes_and_reloads_on_demand() {
        let mut h = harness();
        let source = MockConfigurationSource::new();
        source.upsert(JobId::from(7), json!({"name": "seven", "mtime": 100}));

        let reload = Arc::new(Notify::new());
        let token = CancellationToken::new();
        let process = ConfigurationProcess::new(source.clone(), &h.socket, 1, Some(Duration::from_secs(3600)))
            .with_parent_lookup(parent_is_one)
            .with_ready_signal(no_signal);
        let run = tokio::spawn(process.run(reload.clone(), token.clone()));

        let first = h.pushes.recv().await.unwrap();
        let pushed: RawConfiguration = serde_json::from_str(&first.body).unwrap();
        assert_eq!(pushed[&JobId::from(7)]["mtime"], 100);
        first.respond(RESP_OK);

        source.upsert(JobId::from(7), json!({"name": "seven", "mtime": 150}));
        reload.notify_one();
        let second = h.pushes.recv().await.unwrap();
        let pushed: RawConfiguration = serde_json::from_str(&second.body).unwrap();
        assert_eq!(pushed[&JobId::from(7)]["mtime"], 150);
        second.respond(RESP_OK);

        token.cancel();
        assert_eq!(run.await.unwrap(), ExitCode::Success);
        h.server.cancel();
    }

    #[tokio::test]
    async fn test_pushed_body_validates_like_the_source() {
        let mut h = harness();
        let source = MockConfigurationSource::new();
        source.upsert(
            JobId::from(1),
            json!({"name": "one", "workerClass": "mock", "mtime": 10}),
        );
        source.upsert(
            JobId::from(2),
            json!({
                "name": "two",
                "workerClass": "mock",
                "mtime": 20,
                "workerConfig": {"failAfterCycles": 3},
                "shortRunTimeSeconds": 30,
                "shutdownTimeoutSeconds": 2
            }),
        );

        let token = CancellationToken::new();
        let process = ConfigurationProcess::new(source.clone(), &h.socket, 1, Some(Duration::from_secs(3600)))
            .with_parent_lookup(parent_is_one)
            .with_ready_signal(no_signal);
        let run = tokio::spawn(process.run(Arc::new(Notify::new()), token.clone()));

        let push = h.pushes.recv().await.unwrap();
        let pushed: RawConfiguration = serde_json::from_str(&push.body).unwrap();
        push.respond(RESP_OK);

        let mut registry = WorkerRegistry::new();
        registry.register("mock", MockWorker::factory);
        let validator = ConfigurationValidator::new(&registry);
        let (received, rejected) = validator.validate_all(&pushed);
        let (expected, _) = validator.validate_all(&source.load_configuration().await.unwrap());
        assert!(rejected.is_empty(), "{rejected:?}");
        assert_eq!(received.len(), 2);
        assert_eq!(received, expected);

        token.cancel();
        assert_eq!(run.await.unwrap(), ExitCode::Success);
        h.server.cancel();
    }

    #[tokio::test]
    async fn test_unchanged_source_is_not_pushed_again() {
        let mut h = harness();
        let source = MockConfigurationSource::new();
        source.upsert(JobId::from(1), json!({"name": "one", "mtime": 1}));

        let token = CancellationToken::new();
        let process = ConfigurationProcess::new(source, &h.socket, 1, Some(Duration::from_millis(5)))
            .with_parent_lookup(parent_is_one)
            .with_ready_signal(no_signal);
        let run = tokio::spawn(process.run(Arc::new(Notify::new()), token.clone()));

        h.pushes.recv().await.unwrap().respond("cannot deserialize payload");
        let again = tokio::time::timeout(Duration::from_millis(100), h.pushes.recv()).await;
        assert!(again.is_err());

        token.cancel();
        assert_eq!(run.await.unwrap(), ExitCode::Success);
        h.server.cancel();
    }

    #[tokio::test]
    async fn test_orphan_exits_with_parent_changed() {
        let h = harness();
        let process = ConfigurationProcess::new(MockConfigurationSource::new(), &h.socket, 4242, None)
            .with_parent_lookup(parent_is_one)
            .with_ready_signal(no_signal);
        let code = process.run(Arc::new(Notify::new()), CancellationToken::new()).await;
        assert_eq!(code, ExitCode::ParentChanged);
        h.server.cancel();
    }

    #[tokio::test]
    async fn test_missing_socket_exits_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let process = ConfigurationProcess::new(MockConfigurationSource::new(), dir.path().join("config"), 1, None)
            .with_ready_signal(no_signal);
        let code = process.run(Arc::new(Notify::new()), CancellationToken::new()).await;
        assert_eq!(code, ExitCode::Unavailable);
    }
}
