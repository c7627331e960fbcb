//! # Supervisor: the process manager main loop.
//!
//! The [`Supervisor`] owns the job store, the configuration process manager
//! and the process launcher. A single loop mutates all of them; sockets and
//! signals only feed it messages.
//!
//! ## High-level architecture
//! ```text
//! Supervisor::run(subscribers)
//!   - bind config socket (mandatory) and control socket (optional)
//!   - signals::listen()                    SIGCHLD / SIGTERM / SIGINT / SIGUSR1 / SIGHUP
//!   - MessageServer per socket  ──► inbox (Request + oneshot reply)
//!   - subscriber_listener(): Bus ──► SubscriberSet::emit(&Event)
//!
//! Loop (RUNNING), one iteration:
//!   reap children ─────────────────────────────► JobStore::update_for_terminated_process
//!   (a) config process: start / wait / give up   (start waits for SIGUSR1)
//!   (b) apply pending configuration              validate ► reconcile ► events
//!   (c) slate scheduled restarts
//!   (d) restart ► stop ► start                   (SIGTERM / SIGTERM / spawn)
//!   (e) SIGKILL overdue stops
//!   (f) serve queued config pushes and control commands
//!   (g) wait for a signal, a request or the tick
//!
//! Loop (DRAINING): reap, clear pending, SIGTERM everything still alive,
//! SIGKILL whatever outlives its timeout, until no child is left.
//! ```
//!
//! ## Rules
//! - Restarts are issued before stops, which are issued before starts.
//! - A job gets at most one SIGTERM and at most one SIGKILL per stop.
//! - Nothing is started once draining began.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::SupervisorConfig;
use crate::core::config_manager::{ConfigProcessAction, ConfigProcessManager};
use crate::core::control::{self, ControlCommand};
use crate::core::exit::ExitCode;
use crate::core::signals::{self, SignalEvent};
use crate::core::spawn::ProcessLauncher;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::ipc::{
    CONFIG_SOCKET, CONTROL_SOCKET, Channel, MessageServer, RESP_EDESERIALIZE, RESP_OK, Request, bind_in,
};
use crate::jobs::{
    Action, CfState, Clock, ConfigurationValidator, JobId, JobStore, RawConfiguration, SystemClock,
};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::workers::WorkerRegistry;

const INBOX_CAPACITY: usize = 64;

/// Message sources feeding the loop.
pub struct LoopInputs {
    /// Signals delivered to the supervisor.
    pub signals: mpsc::UnboundedReceiver<SignalEvent>,
    /// Requests from the config and control sockets.
    pub inbox: mpsc::Receiver<Request>,
    /// Path handed to the configuration process.
    pub config_socket: PathBuf,
}

struct Inputs {
    signals: mpsc::UnboundedReceiver<SignalEvent>,
    inbox: mpsc::Receiver<Request>,
    signals_open: bool,
    inbox_open: bool,
}

/// The process manager.
pub struct Supervisor<L> {
    cfg: SupervisorConfig,
    store: JobStore,
    workers: WorkerRegistry,
    launcher: L,
    config_process: ConfigProcessManager,
    bus: Bus,
    pending_config: Option<RawConfiguration>,
    config_socket: PathBuf,
    shutdown: Option<ExitCode>,
}

impl<L: ProcessLauncher> Supervisor<L> {
    /// Creates a supervisor for the worker classes in `workers`.
    pub fn new(cfg: SupervisorConfig, workers: WorkerRegistry, launcher: L) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        Self {
            store: JobStore::new(cfg.job_backoff, Arc::new(SystemClock)),
            config_process: ConfigProcessManager::new(cfg.config_process),
            cfg,
            workers,
            launcher,
            bus,
            pending_config: None,
            config_socket: PathBuf::new(),
            shutdown: None,
        }
    }

    /// Replaces the job store clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.store = JobStore::new(self.cfg.job_backoff, clock);
        self
    }

    /// Binds the sockets, installs signal handlers and runs until drained.
    pub async fn run(self, subscribers: Vec<Arc<dyn Subscribe>>) -> Result<ExitCode, RuntimeError> {
        let dirs = self.cfg.socket_dirs.clone();
        let (config_socket, config_listener) =
            bind_in(CONFIG_SOCKET, &dirs).ok_or_else(|| RuntimeError::SocketUnavailable {
                name: CONFIG_SOCKET,
                tried: dirs.clone(),
            })?;
        info!(socket = %config_socket.display(), "config socket listening");
        let (signals, _signal_task) = signals::listen().map_err(RuntimeError::Signals)?;

        let token = CancellationToken::new();
        let (inbox_tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        MessageServer::new(Channel::Config, config_socket.clone(), config_listener)
            .serve(inbox_tx.clone(), token.clone());
        match bind_in(CONTROL_SOCKET, &dirs) {
            Some((path, listener)) => {
                info!(socket = %path.display(), "control socket listening");
                MessageServer::new(Channel::Control, path, listener).serve(inbox_tx, token.clone());
            }
            None => warn!(tried = ?dirs, "no usable location for the control socket, control messages disabled"),
        }

        let set = SubscriberSet::new(subscribers, self.bus.clone());
        let listener = subscriber_listener(&self.bus, set, token.clone());

        let code = self
            .drive(LoopInputs {
                signals,
                inbox,
                config_socket,
            })
            .await;

        token.cancel();
        if let Ok(set) = listener.await {
            set.shutdown().await;
        }
        Ok(code)
    }

    /// Runs the loop over already established inputs; returns the exit code once drained.
    pub async fn drive(mut self, inputs: LoopInputs) -> ExitCode {
        self.config_socket = inputs.config_socket;
        let mut io = Inputs {
            signals: inputs.signals,
            inbox: inputs.inbox,
            signals_open: true,
            inbox_open: true,
        };
        info!("supervisor running");

        loop {
            while let Ok(ev) = io.signals.try_recv() {
                self.on_signal(ev);
            }
            self.reap();

            if let Some(code) = self.shutdown {
                self.drain_step();
                if self.store.running_count() == 0 && self.config_process.pid().is_none() {
                    self.bus.publish(Event::new(EventKind::Drained));
                    info!(exit_code = code.code(), "all processes stopped, exiting");
                    return code;
                }
            } else {
                if let Err(e) = self.ensure_config_process(&mut io).await {
                    error!(label = e.as_label(), error = %e, "cannot obtain configuration");
                    self.begin_shutdown(e.to_string(), e.exit_code());
                    continue;
                }
                if self.shutdown.is_some() {
                    continue;
                }
                self.apply_pending_configuration();
                self.store.slate_scheduled_restarts();
                self.execute_pending();
            }

            self.kill_overdue();

            while let Ok(req) = io.inbox.try_recv() {
                self.on_request(req);
            }

            self.wait(&mut io).await;
        }
    }

    async fn wait(&mut self, io: &mut Inputs) {
        tokio::select! {
            ev = io.signals.recv(), if io.signals_open => match ev {
                Some(ev) => self.on_signal(ev),
                None => io.signals_open = false,
            },
            req = io.inbox.recv(), if io.inbox_open => match req {
                Some(req) => self.on_request(req),
                None => io.inbox_open = false,
            },
            _ = tokio::time::sleep(self.cfg.tick_clamped()) => {}
        }
    }

    // ---------------------------
    // Signals and children
    // ---------------------------

    fn on_signal(&mut self, ev: SignalEvent) {
        match ev {
            SignalEvent::ChildExited => self.reap(),
            SignalEvent::Terminate(name) => {
                info!(signal = name, "termination signal received");
                self.begin_shutdown(format!("received {name}"), ExitCode::Success);
            }
            SignalEvent::ConfigReady => debug!("readiness signal outside of a config process start"),
            SignalEvent::Reload => self.reload_configuration(),
        }
    }

    fn reap(&mut self) {
        for (pid, status) in self.launcher.reap() {
            if self.config_process.owns(pid) {
                let delay = self.config_process.on_exited(Instant::now());
                let mut ev = Event::new(EventKind::ConfigProcessExited)
                    .with_pid(pid)
                    .with_status(status);
                if let Some(delay) = delay {
                    ev = ev.with_delay(delay);
                }
                self.bus.publish(ev);
                continue;
            }

            let Some(id) = self.store.update_for_terminated_process(pid, status) else {
                debug!(pid, %status, "reaped a process that belongs to no job");
                continue;
            };
            let now = self.store.now();
            let (delay, removed) = match self.store.get(&id) {
                Some(job) => (
                    job.state.restart_at.map(|at| at.saturating_sub(now)),
                    job.state.cf_state == CfState::Removed,
                ),
                None => (None, true),
            };
            let mut ev = Event::new(EventKind::JobExited)
                .with_job(&id)
                .with_pid(pid)
                .with_status(status);
            if let (Some(secs), false) = (delay, removed) {
                ev = ev.with_delay(Duration::from_secs(secs));
            }
            self.bus.publish(ev);

            if removed {
                for purged in self.store.purge_removed_jobs() {
                    self.bus.publish(Event::new(EventKind::JobPurged).with_job(&purged));
                }
            }
        }
    }

    // ---------------------------
    // Configuration process
    // ---------------------------

    async fn ensure_config_process(&mut self, io: &mut Inputs) -> Result<(), RuntimeError> {
        match self.config_process.next_action(Instant::now()) {
            ConfigProcessAction::Wait => Ok(()),
            ConfigProcessAction::GiveUp => Err(RuntimeError::ConfigProcessExhausted {
                retries: self.config_process.retries(),
            }),
            ConfigProcessAction::Start => match self.launcher.spawn_config_process(&self.config_socket) {
                Ok(pid) => {
                    self.config_process.on_started(pid);
                    let mut ev = Event::new(EventKind::ConfigProcessStarted)
                        .with_pid(pid)
                        .with_attempt(self.config_process.retries());
                    if let Some(delay) = self.config_process.last_delay() {
                        ev = ev.with_delay(delay);
                    }
                    self.bus.publish(ev);
                    self.await_config_ready(pid, io).await
                }
                Err(e) => {
                    error!(label = e.as_label(), error = %e, "cannot spawn config process");
                    self.config_process.on_exited(Instant::now());
                    Ok(())
                }
            },
        }
    }

    /// Waits for SIGUSR1 from `pid`. Other signals are handled meanwhile.
    async fn await_config_ready(&mut self, pid: i32, io: &mut Inputs) -> Result<(), RuntimeError> {
        let timeout = self.cfg.config_ready_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(RuntimeError::ConfigProcessNotReady { timeout });
                }
                ev = io.signals.recv(), if io.signals_open => match ev {
                    Some(SignalEvent::ConfigReady) => {
                        self.bus.publish(Event::new(EventKind::ConfigProcessReady).with_pid(pid));
                        return Ok(());
                    }
                    Some(SignalEvent::ChildExited) => {
                        self.reap();
                        if !self.config_process.owns(pid) {
                            warn!(pid, "config process exited before signalling readiness");
                            return Ok(());
                        }
                    }
                    Some(SignalEvent::Terminate(name)) => {
                        self.begin_shutdown(format!("received {name}"), ExitCode::Success);
                        return Ok(());
                    }
                    Some(SignalEvent::Reload) => debug!("reload ignored, config process is starting"),
                    None => io.signals_open = false,
                },
            }
        }
    }

    fn reload_configuration(&mut self) {
        match self.config_process.pid() {
            Some(pid) => {
                info!(pid, "forwarding reload to config process");
                if let Err(e) = self.launcher.signal(pid, Signal::SIGHUP) {
                    warn!(label = e.as_label(), error = %e, "cannot signal config process");
                }
            }
            None => warn!("reload requested but no config process is running"),
        }
    }

    fn apply_pending_configuration(&mut self) {
        let Some(raw) = self.pending_config.take() else {
            return;
        };
        let (config, rejected) = ConfigurationValidator::new(&self.workers).validate_all(&raw);
        for err in &rejected {
            self.bus.publish(
                Event::new(EventKind::JobRejected)
                    .with_job(&err.job)
                    .with_reason(err.to_string()),
            );
        }

        let report = self.store.reconcile(&config);
        for id in &report.purged {
            self.bus.publish(Event::new(EventKind::JobPurged).with_job(id));
        }
        for (kind, ids) in [(EventKind::JobAdded, &report.added), (EventKind::JobUpdated, &report.updated)] {
            for id in ids {
                let name = self.store.get(id).map(|j| j.config.name.clone()).unwrap_or_default();
                self.bus.publish(Event::new(kind).with_job(id).with_reason(name));
            }
        }
        for id in &report.removed {
            self.bus.publish(Event::new(EventKind::JobRemoved).with_job(id));
        }
        self.bus.publish(Event::new(EventKind::ConfigApplied).with_reason(format!(
            "{} jobs: {} added, {} updated, {} removed, {} rejected",
            config.len(),
            report.added.len(),
            report.updated.len(),
            report.removed.len(),
            rejected.len()
        )));
    }

    // ---------------------------
    // Jobs
    // ---------------------------

    fn execute_pending(&mut self) {
        while let Some(id) = self.store.pop_pending(Action::Restart) {
            self.stop_job(&id);
        }
        while let Some(id) = self.store.pop_pending(Action::Stop) {
            self.stop_job(&id);
        }
        while let Some(id) = self.store.pop_pending(Action::Start) {
            self.start_job(&id);
        }
    }

    fn start_job(&mut self, id: &JobId) {
        let Some(job) = self.store.get(id) else {
            return;
        };
        if job.state.pid.is_some() || job.state.cf_state == CfState::Removed {
            debug!(job = %id, "not starting job");
            return;
        }
        let config = job.config.clone();
        match self.launcher.spawn_worker(id, &config) {
            Ok(pid) => {
                if self.store.update_started_job(id, pid).is_ok() {
                    self.bus.publish(Event::new(EventKind::JobStarted).with_job(id).with_pid(pid));
                }
            }
            Err(e) => {
                self.store.update_for_failed_start(id);
                self.bus.publish(
                    Event::new(EventKind::JobStartFailed)
                        .with_job(id)
                        .with_reason(e.to_string()),
                );
            }
        }
    }

    fn stop_job(&mut self, id: &JobId) {
        let Some(pid) = self.store.get(id).and_then(|j| j.state.pid) else {
            warn!(job = %id, "cannot stop job, it is not running");
            return;
        };
        if self.store.is_stopping(id) {
            return;
        }
        match self.launcher.signal(pid, Signal::SIGTERM) {
            Ok(()) => {
                let _ = self.store.mark_as_stopping(id);
                self.bus.publish(Event::new(EventKind::JobStopping).with_job(id).with_pid(pid));
            }
            Err(e) => warn!(job = %id, label = e.as_label(), error = %e, "cannot stop job"),
        }
    }

    fn kill_overdue(&mut self) {
        for (id, pid) in self.store.overdue_stops() {
            if let Err(e) = self.launcher.signal(pid, Signal::SIGKILL) {
                warn!(job = %id, label = e.as_label(), error = %e, "cannot kill job");
            }
            self.store.mark_as_killed(&id);
            self.bus.publish(Event::new(EventKind::JobKilled).with_job(&id).with_pid(pid));
        }
        if let Some(pid) = self.config_process.overdue_kill(Instant::now()) {
            warn!(pid, "config process did not stop in time, killing it");
            if let Err(e) = self.launcher.signal(pid, Signal::SIGKILL) {
                warn!(label = e.as_label(), error = %e, "cannot kill config process");
            }
        }
    }

    // ---------------------------
    // Shutdown
    // ---------------------------

    fn begin_shutdown(&mut self, reason: String, code: ExitCode) {
        if self.shutdown.is_some() {
            return;
        }
        self.shutdown = Some(code);
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(reason));
        self.drain_step();
    }

    fn drain_step(&mut self) {
        self.store.clear_pending();
        if let Some(pid) = self.config_process.pid().filter(|_| !self.config_process.is_terminating()) {
            match self.launcher.signal(pid, Signal::SIGTERM) {
                Ok(()) => info!(pid, "stopping config process"),
                Err(e) => warn!(label = e.as_label(), error = %e, "cannot stop config process"),
            }
            self.config_process.mark_terminating(Instant::now());
        }
        let running: Vec<JobId> = self
            .store
            .jobs()
            .filter(|(_, job)| job.state.pid.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        for id in running {
            self.stop_job(&id);
        }
    }

    // ---------------------------
    // Requests
    // ---------------------------

    fn on_request(&mut self, req: Request) {
        let response = match req.channel {
            Channel::Config => self.on_configuration(&req.body),
            Channel::Control => self.on_control(&req.body),
        };
        req.respond(response);
    }

    fn on_configuration(&mut self, body: &str) -> String {
        match serde_json::from_str::<RawConfiguration>(body) {
            Ok(raw) => {
                info!(jobs = raw.len(), "received configuration");
                self.pending_config = Some(raw);
                RESP_OK.to_string()
            }
            Err(e) => {
                warn!(error = %e, "cannot deserialize configuration payload");
                RESP_EDESERIALIZE.to_string()
            }
        }
    }

    fn on_control(&mut self, body: &str) -> String {
        debug!(message = body, "control message");
        match ControlCommand::parse(body) {
            ControlCommand::Help => control::help(),
            ControlCommand::Status => control::status(&self.store),
            ControlCommand::Metrics => control::metrics(&self.store),
            ControlCommand::Stop => {
                self.begin_shutdown("stop command".to_string(), ExitCode::Success);
                control::stopping()
            }
            ControlCommand::Restart(None) => control::restart_needs_id(),
            ControlCommand::Restart(Some(id)) => {
                let response = match self.store.schedule_restart_on_demand(&id) {
                    Ok(message) | Err(message) => message,
                };
                self.bus.publish(
                    Event::new(EventKind::RestartRequested)
                        .with_job(&id)
                        .with_reason(response.clone()),
                );
                response
            }
            ControlCommand::Reload => {
                self.reload_configuration();
                control::reload_scheduled()
            }
            ControlCommand::Unknown(message) => control::unknown(&message),
        }
    }
}

/// Forwards bus events to the subscriber set until `token` is cancelled,
/// then flushes what is still queued and hands the set back.
fn subscriber_listener(bus: &Bus, set: SubscriberSet, token: CancellationToken) -> JoinHandle<SubscriberSet> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "event listener lagged"),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = token.cancelled() => break,
            }
        }
        while let Ok(ev) = rx.try_recv() {
            set.emit(&ev);
        }
        set
    })
}
