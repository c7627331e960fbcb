//! # Inter-process messaging.
//!
//! Two Unix domain sockets, found by directory discovery ([`bind_in`] / [`find_in`]):
//! - `config`: the configuration process pushes the full job mapping (JSON);
//!   the supervisor answers [`RESP_OK`] or [`RESP_EDESERIALIZE`].
//! - `control`: operator text commands (`help`, `status`, `restart <id>`, ...).

mod channel;
mod socket;

pub use channel::{Channel, MessageClient, MessageServer, Request};
pub use socket::{CONFIG_SOCKET, CONTROL_SOCKET, bind_in, default_socket_dirs, find_in};

/// Configuration accepted.
pub const RESP_OK: &str = "ok";
/// Configuration payload could not be decoded.
pub const RESP_EDESERIALIZE: &str = "cannot deserialize payload";
