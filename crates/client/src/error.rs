//! Error type for session operations.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use vici_protocol::{CommandFailed, ProtocolError, TypeMismatch};

/// Error type for session, transport and listener operations.
///
/// The type is `Clone` so a listener's terminal error can be handed out on
/// every later `next_event` call; I/O errors are shared behind an [`Arc`].
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Reading, writing or closing the connection failed.
    #[error("io error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// A frame or message could not be parsed, or arrived out of turn.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The daemon does not know the command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The daemon does not know the event.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// A message field was read with the wrong accessor.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    /// The daemon reported `success = no`.
    #[error(transparent)]
    CommandFailed(#[from] CommandFailed),

    /// The event listener was stopped or its session closed.
    #[error("event listener is closed")]
    ListenerClosed,

    /// The listener's cancellation token fired.
    #[error("event listener was cancelled")]
    Cancelled,

    /// `listen` was called while another listener is active.
    #[error("an event listener is already active")]
    ListenerActive,

    /// The session was closed, or its command connection failed earlier.
    #[error("session is closed")]
    SessionClosed,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    /// Whether the error leaves the connection it happened on unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Protocol(_))
    }
}

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
