//! Transport seam.
//!
//! The session talks to the server through [`Transport`]: open a connection,
//! make request/response calls, fire one-way messages and close.  Inbound
//! named messages and the end-of-connection notice arrive on the channel
//! returned by [`Transport::connect`], so the session consumes every inbound
//! event from a single ordered stream.
//!
//! [`TcpTransport`] is the production implementation; tests substitute a
//! scripted fake.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod framing;
pub mod tcp;

pub use framing::{Frame, FrameConfig, FrameError};
pub use tcp::{TcpTransport, TcpTransportConfig};

/// Connection status as the transport sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Closed,
    Opening,
    Opened,
    Closing,
}

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A named server message.
    Message { name: String, payload: Value },
    /// The connection ended.  Emitted exactly once per connection; always
    /// the last event on the channel.
    Disconnected {
        manual: bool,
        reason: Option<String>,
    },
}

pub type InboundReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    /// The server answered a call with an error.
    #[error("{0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub trait Transport: Send + Sync + 'static {
    /// Open the connection.  The receiver yields inbound events until (and
    /// including) the single `Disconnected` notice.
    fn connect(&self) -> impl Future<Output = Result<InboundReceiver, TransportError>> + Send;

    /// Request/response call.  Resolves with the server's reply payload.
    fn call(
        &self,
        name: &str,
        payload: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    /// One-way message.  Dropped silently when not connected.
    fn send(&self, name: &str, payload: Value);

    /// Close the connection.  `manual` is carried into the `Disconnected`
    /// notice.  No-op when already closed.
    fn disconnect(&self, manual: bool);

    fn status(&self) -> TransportStatus;

    /// Round-trip time of the most recent heartbeat, if one has completed.
    fn last_heartbeat_latency(&self) -> Option<Duration>;
}
