//! VICI Client
//!
//! An async client for the daemon's VICI control socket.
//!
//! # How it works
//!
//! 1. [`Session::connect`] opens the command connection
//! 2. [`Session::command`] sends a named request and waits for its response
//! 3. [`Session::listen`] opens a second connection, registers for events and
//!    hands it to a background task
//! 4. [`Session::next_event`] pulls events until the listener is stopped,
//!    cancelled or fails
//!
//! # Example
//!
//! ```rust,no_run
//! use vici::{CancellationToken, Message, Session, SessionOptions};
//!
//! # async fn run() -> vici::Result<()> {
//! let session = Session::connect(SessionOptions::default()).await?;
//!
//! let version = session.command("version", Message::new()).await?;
//! println!("{version}");
//!
//! let ctx = CancellationToken::new();
//! session.listen(ctx.clone(), ["ike-updown"]).await?;
//! let event = session.next_event().await?;
//! println!("{event}");
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod listener;
mod options;
mod session;
mod transport;

pub use error::{Error, Result};
pub use listener::ListenerState;
pub use options::SessionOptions;
pub use session::{Session, StreamedResponse};
pub use transport::{BoxedStream, Stream, Transport};

// Re-export wire types so callers need only this crate
pub use tokio_util::sync::CancellationToken;
pub use vici_protocol::{
    CommandFailed, FramedMessage, Message, Packet, PacketType, ProtocolError, TypeMismatch, Value,
    ValueKind,
};
