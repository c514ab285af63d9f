//! Transport port: what the connection manager needs from a socket.
//!
//! The manager never touches a WebSocket library directly.  It asks a
//! [`Connector`] for a [`Socket`], which is a pair of channels:
//!
//! - `outbound` accepts frames to write (and a close request);
//! - `inbound` yields frames, the close notification, and errors.
//!
//! `infrastructure::websocket::WsConnector` is the production implementation;
//! tests plug in an in-memory connector.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

/// Errors reported by a transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// An established socket failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// The connection was closed before the operation completed.
    #[error("connection closed")]
    Closed,
}

/// One WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Binary(b) => b.len(),
            Frame::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Requests accepted by a socket's outbound channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    /// Send a normal close and stop writing.
    Close,
}

/// Everything a socket can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Message(Frame),
    Closed { code: Option<u16>, reason: String },
    Error(TransportError),
}

/// An open socket, reduced to its two channel ends.
///
/// Dropping `outbound` asks the transport to close the socket.
#[derive(Debug)]
pub struct Socket {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Opens sockets.  Resolves once the socket is open or has failed to open.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Socket, TransportError>;
}
