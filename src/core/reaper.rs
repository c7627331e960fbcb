//! # Child reaping.
//!
//! [`reap_children`] collects every child that has terminated so far without
//! blocking. It is called on each SIGCHLD and once per loop iteration; a call
//! with nothing to reap returns an empty list.

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid as NixPid;
use tracing::{debug, warn};

use crate::jobs::{ExitStatus, Pid};

/// Reaps all terminated children, in the order the kernel reports them.
///
/// Stopped and continued children are skipped; they are still alive.
pub fn reap_children() -> Vec<(Pid, ExitStatus)> {
    let mut reaped = Vec::new();
    loop {
        match waitpid(NixPid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => reaped.push((pid.as_raw(), ExitStatus::Exited(code))),
            Ok(WaitStatus::Signaled(pid, signal, _core)) => {
                reaped.push((pid.as_raw(), ExitStatus::Signaled(signal as i32)))
            }
            Ok(WaitStatus::StillAlive) => break,
            Ok(other) => debug!(status = ?other, "ignoring child status change"),
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(e) => {
                warn!(error = %e, "waitpid failed");
                break;
            }
        }
    }
    reaped
}
