//! # OS signal handling.
//!
//! Signals are never acted upon inside a handler. A listener task turns each
//! delivery into a message; the owner drains those messages at a point of
//! its choosing.
//!
//! **Supervisor** ([`listen`]):
//! - `SIGCHLD` → [`SignalEvent::ChildExited`]
//! - `SIGTERM`, `SIGINT` → [`SignalEvent::Terminate`]
//! - `SIGUSR1` → [`SignalEvent::ConfigReady`]
//! - `SIGHUP` → [`SignalEvent::Reload`]
//!
//! **Children**:
//! - [`shutdown_token`]: `SIGTERM` / `SIGINT` cancel a token
//! - [`reload_notify`]: `SIGHUP` stores a wake-up permit
//!
//! Registration happens before the function returns, so a signal sent right
//! after is not lost (and does not run the default action).

use std::io;
use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A signal delivered to the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalEvent {
    /// At least one child changed state.
    ChildExited,
    /// Graceful shutdown requested; carries the signal name.
    Terminate(&'static str),
    /// The configuration process is accepting pushes.
    ConfigReady,
    /// Re-poll the configuration now.
    Reload,
}

/// Installs the supervisor's signal listeners.
///
/// Returns the receiving side and the listener task; the task ends once the
/// receiver is dropped.
pub fn listen() -> io::Result<(mpsc::UnboundedReceiver<SignalEvent>, JoinHandle<()>)> {
    let mut sigchld = signal(SignalKind::child())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        loop {
            let ev = tokio::select! {
                _ = sigchld.recv() => SignalEvent::ChildExited,
                _ = sigterm.recv() => SignalEvent::Terminate("SIGTERM"),
                _ = sigint.recv()  => SignalEvent::Terminate("SIGINT"),
                _ = sigusr1.recv() => SignalEvent::ConfigReady,
                _ = sighup.recv()  => SignalEvent::Reload,
                _ = tx.closed()    => break,
            };
            if tx.send(ev).is_err() {
                break;
            }
        }
    });
    Ok((rx, handle))
}

/// Token cancelled on the first `SIGTERM` or `SIGINT`.
pub fn shutdown_token() -> io::Result<CancellationToken> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv()  => {},
            _ = sigterm.recv() => {},
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    });
    Ok(token)
}

/// Notified on every `SIGHUP`.
pub fn reload_notify() -> io::Result<Arc<Notify>> {
    let mut sighup = signal(SignalKind::hangup())?;

    let notify = Arc::new(Notify::new());
    let weak = Arc::downgrade(&notify);
    tokio::spawn(async move {
        while sighup.recv().await.is_some() {
            match weak.upgrade() {
                Some(notify) => notify.notify_one(),
                None => break,
            }
        }
    });
    Ok(notify)
}
