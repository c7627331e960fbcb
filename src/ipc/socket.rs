//! # Socket rendezvous.
//!
//! Both sockets live in the first usable directory among the candidates
//! (default: `/run/procvisor`, then `/run/user/<euid>/procvisor`). The server
//! creates the directory (mode `0700`) if needed and removes a stale socket file
//! left by a dead supervisor; a socket that still accepts connections is left
//! alone and the next candidate is tried.

use std::fs::DirBuilder;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt};
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;
use tracing::{debug, warn};

/// File name of the configuration socket.
pub const CONFIG_SOCKET: &str = "config";
/// File name of the control socket.
pub const CONTROL_SOCKET: &str = "control";

/// Default candidate directories for the current effective user.
pub fn default_socket_dirs() -> Vec<PathBuf> {
    let euid = nix::unistd::geteuid();
    vec![
        PathBuf::from("/run/procvisor"),
        PathBuf::from(format!("/run/user/{euid}/procvisor")),
    ]
}

/// Binds `name` in the first usable candidate directory.
///
/// Returns `None` if no candidate works; each failure is logged.
pub fn bind_in(name: &str, dirs: &[PathBuf]) -> Option<(PathBuf, UnixListener)> {
    for dir in dirs {
        if let Err(e) = DirBuilder::new().recursive(true).mode(0o700).create(dir) {
            debug!(dir = %dir.display(), error = %e, "cannot create socket directory");
            continue;
        }
        let path = dir.join(name);
        if !clear_stale(&path) {
            continue;
        }
        match UnixListener::bind(&path) {
            Ok(listener) => return Some((path, listener)),
            Err(e) => warn!(path = %path.display(), error = %e, "cannot bind socket"),
        }
    }
    None
}

/// First candidate where a socket file `name` exists.
pub fn find_in(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter().map(|dir| dir.join(name)).find(|path| is_socket(path))
}

fn is_socket(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.file_type().is_socket())
}

/// Removes `path` if it is a socket nobody listens on. Returns false if the path stays occupied.
fn clear_stale(path: &Path) -> bool {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return true;
    };
    if !meta.file_type().is_socket() {
        warn!(path = %path.display(), "path exists and is not a socket");
        return false;
    }
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        warn!(path = %path.display(), "socket is in use by another process");
        return false;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale socket");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot remove stale socket");
            false
        }
    }
}
