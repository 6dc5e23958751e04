//! Session tuning options.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use vici_protocol::FramedMessage;

/// Options for a [`Session`](crate::Session) and its event listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Control socket path, used by `connect` and by `listen`
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Capacity of the event delivery channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// How long teardown waits for the daemon to confirm unregistration
    #[serde(default = "default_unregister_timeout_ms")]
    pub unregister_timeout_ms: u64,

    /// Largest frame accepted from the daemon, in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Keep delivering buffered events after the listener stops.
    ///
    /// When false, `next_event` reports the terminal error as soon as the
    /// listener is stopped or cancelled and buffered events are discarded.
    #[serde(default)]
    pub drain_on_close: bool,
}

fn default_socket_path() -> PathBuf {
    vici_protocol::get_socket_path()
}

fn default_event_buffer() -> usize {
    64
}

fn default_unregister_timeout_ms() -> u64 {
    1000
}

fn default_max_frame_size() -> usize {
    FramedMessage::MAX_SIZE
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            event_buffer: default_event_buffer(),
            unregister_timeout_ms: default_unregister_timeout_ms(),
            max_frame_size: default_max_frame_size(),
            drain_on_close: false,
        }
    }
}

impl SessionOptions {
    /// Override the socket path
    pub fn with_socket(mut self, socket: Option<PathBuf>) -> Self {
        if let Some(s) = socket {
            self.socket_path = s;
        }
        self
    }

    /// Override the delivery channel capacity (at least 1)
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Override the unregister timeout
    pub fn with_unregister_timeout(mut self, timeout: Duration) -> Self {
        self.unregister_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Choose whether buffered events survive listener shutdown
    pub fn with_drain_on_close(mut self, drain: bool) -> Self {
        self.drain_on_close = drain;
        self
    }

    pub fn unregister_timeout(&self) -> Duration {
        Duration::from_millis(self.unregister_timeout_ms)
    }

    pub(crate) fn channel_capacity(&self) -> usize {
        self.event_buffer.max(1)
    }
}
