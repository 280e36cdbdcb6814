//! Session-level error taxonomy.
//!
//! Connect and join failures are fatal for the session that produced them;
//! they carry only a human-readable message because the supervisor never
//! branches on their cause.  Chat send failures are recoverable and hand the
//! unsent text back to the caller.

use thiserror::Error;

use crate::types::SessionStatus;

/// The transport could not be opened (unreachable, rejected handshake, …).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to connect to server: {message}")]
pub struct ConnectError {
    pub message: String,
}

impl ConnectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The join handshake was rejected or could not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to join sub-world: {message}")]
pub struct JoinError {
    pub message: String,
}

impl JoinError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A chat line was not accepted.  `text` is the original input so the caller
/// can put it back in front of the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("chat message not delivered: {reason}")]
pub struct SendChatError {
    pub reason: String,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error("session already started (status: {0})")]
    AlreadyStarted(SessionStatus),

    #[error("session was torn down before the join completed")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SessionError>;
