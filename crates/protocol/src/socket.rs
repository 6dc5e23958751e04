//! Socket path helpers for the daemon's control socket.

use std::path::PathBuf;

/// Default control socket of the IKE daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/charon.vici";

/// Environment variable to override the socket path.
pub const SOCKET_ENV_VAR: &str = "VICI_SOCKET";

/// Get the socket path to use.
///
/// Checks the `VICI_SOCKET` environment variable first,
/// falling back to `/var/run/charon.vici`.
#[must_use]
pub fn get_socket_path() -> PathBuf {
    std::env::var_os(SOCKET_ENV_VAR)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}
