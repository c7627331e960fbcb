//! # Framed request/response messaging over Unix domain sockets.
//!
//! ```text
//! MessageClient ──frame──► MessageServer (per-connection task)
//!                                │ Request { channel, body, reply }
//!                                ▼
//!                          supervisor inbox (mpsc)
//!                                │ request.respond(..)
//! MessageClient ◄──frame─────────┘
//! ```
//!
//! Frames are length-delimited UTF-8 strings. Each request frame gets exactly
//! one response frame; a connection may carry any number of exchanges.

use std::path::{Path, PathBuf};

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::IpcError;

/// Which socket a request arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Configuration pushes from the configuration process.
    Config,
    /// Operator commands.
    Control,
}

impl Channel {
    /// Stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Channel::Config => "config",
            Channel::Control => "control",
        }
    }
}

/// One inbound message awaiting a response from the supervisor.
#[derive(Debug)]
pub struct Request {
    /// Socket it arrived on.
    pub channel: Channel,
    /// Message text.
    pub body: String,
    reply: oneshot::Sender<String>,
}

impl Request {
    /// Builds a request and the receiver its response will arrive on.
    pub fn new(channel: Channel, body: impl Into<String>) -> (Self, oneshot::Receiver<String>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                channel,
                body: body.into(),
                reply,
            },
            rx,
        )
    }

    /// Sends the response back to the peer.
    pub fn respond(self, response: impl Into<String>) {
        let _ = self.reply.send(response.into());
    }
}

/// Listening side of one socket.
pub struct MessageServer {
    channel: Channel,
    path: PathBuf,
    listener: UnixListener,
}

impl MessageServer {
    /// Wraps an already bound listener.
    pub fn new(channel: Channel, path: PathBuf, listener: UnixListener) -> Self {
        Self {
            channel,
            path,
            listener,
        }
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections until `token` is cancelled, forwarding every
    /// request into `inbox`. The socket file is removed when serving stops.
    pub fn serve(self, inbox: mpsc::Sender<Request>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _guard = SocketFile(self.path.clone());
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            debug!(channel = self.channel.as_label(), "connection accepted");
                            tokio::spawn(connection(self.channel, stream, inbox.clone(), token.clone()));
                        }
                        Err(e) => warn!(channel = self.channel.as_label(), error = %e, "accept failed"),
                    },
                }
            }
        })
    }
}

async fn connection(
    channel: Channel,
    stream: UnixStream,
    inbox: mpsc::Sender<Request>,
    token: CancellationToken,
) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return,
            frame = framed.next() => frame,
        };
        let body = match frame {
            None => return,
            Some(Err(e)) => {
                debug!(channel = channel.as_label(), error = %e, "connection read failed");
                return;
            }
            Some(Ok(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(body) => body,
                Err(_) => {
                    warn!(channel = channel.as_label(), "dropping non UTF-8 message");
                    return;
                }
            },
        };

        let (request, reply) = Request::new(channel, body);
        if inbox.send(request).await.is_err() {
            return;
        }
        let Ok(response) = reply.await else {
            return;
        };
        if let Err(e) = framed.send(Bytes::from(response)).await {
            debug!(channel = channel.as_label(), error = %e, "connection write failed");
            return;
        }
    }
}

struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Connecting side; reconnects lazily after a failure.
#[derive(Debug)]
pub struct MessageClient {
    path: PathBuf,
    framed: Option<Framed<UnixStream, LengthDelimitedCodec>>,
}

impl MessageClient {
    /// Client for the socket at `path` (not connected yet).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            framed: None,
        }
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if a connection is open.
    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    /// Opens the connection if it is not open yet.
    pub async fn connect(&mut self) -> Result<(), IpcError> {
        if self.framed.is_none() {
            let stream = UnixStream::connect(&self.path)
                .await
                .map_err(|source| IpcError::Connect {
                    path: self.path.clone(),
                    source,
                })?;
            self.framed = Some(Framed::new(stream, LengthDelimitedCodec::new()));
        }
        Ok(())
    }

    /// Closes the connection.
    pub fn disconnect(&mut self) {
        self.framed = None;
    }

    /// Sends `message` and waits for the response. Any failure closes the connection.
    pub async fn request(&mut self, message: &str) -> Result<String, IpcError> {
        self.connect().await?;
        let result = self.exchange(message).await;
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    async fn exchange(&mut self, message: &str) -> Result<String, IpcError> {
        let framed = self.framed.as_mut().ok_or(IpcError::Closed)?;
        framed.send(Bytes::from(message.to_owned())).await?;
        let frame = framed.next().await.ok_or(IpcError::Closed)??;
        String::from_utf8(frame.to_vec()).map_err(|_| IpcError::Encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::socket::bind_in;

    async fn echo_server(channel: Channel) -> (tempfile::TempDir, PathBuf, CancellationToken) {
        let tmp = tempfile::tempdir().unwrap();
        let (path, listener) = bind_in("test", &[tmp.path().to_path_buf()]).unwrap();
        let (tx, mut rx) = mpsc::channel::<Request>(8);
        let token = CancellationToken::new();
        MessageServer::new(channel, path.clone(), listener).serve(tx, token.clone());
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let body = format!("{}:{}", req.channel.as_label(), req.body);
                req.respond(body);
            }
        });
        (tmp, path, token)
    }

    #[tokio::test]
    async fn test_request_gets_exactly_one_response() {
        let (_tmp, path, token) = echo_server(Channel::Control).await;
        let mut client = MessageClient::new(&path);
        assert_eq!(client.request("status").await.unwrap(), "control:status");
        assert_eq!(client.request("help").await.unwrap(), "control:help");
        assert!(client.is_connected());
        token.cancel();
    }

    #[tokio::test]
    async fn test_large_payload_survives_framing() {
        let (_tmp, path, token) = echo_server(Channel::Config).await;
        let payload = "x".repeat(256 * 1024);
        let mut client = MessageClient::new(&path);
        let response = client.request(&payload).await.unwrap();
        assert_eq!(response.len(), "config:".len() + payload.len());
        token.cancel();
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let mut client = MessageClient::new(tmp.path().join("nobody"));
        let err = client.request("status").await.unwrap_err();
        assert_eq!(err.as_label(), "ipc_connect");
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_reply_closes_connection() {
        let tmp = tempfile::tempdir().unwrap();
        let (path, listener) = bind_in("test", &[tmp.path().to_path_buf()]).unwrap();
        let (tx, mut rx) = mpsc::channel::<Request>(8);
        MessageServer::new(Channel::Config, path.clone(), listener).serve(tx, CancellationToken::new());
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                drop(req);
            }
        });
        let mut client = MessageClient::new(&path);
        let err = client.request("anything").await.unwrap_err();
        assert!(matches!(err, IpcError::Closed | IpcError::Io(_)));
        assert!(!client.is_connected());
    }
}
