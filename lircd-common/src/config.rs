//! Runtime configuration shared by daemon bootstrap code.

use std::path::{Path, PathBuf};

use crate::ids::{COMMAND_TIMEOUT_TICKS, Handle, TICK_INTERVAL};

/// Bootstrap configuration used by `lircd-server` during process startup.
///
/// The backend and control endpoints are always derived from the client socket path, matching
/// the documented `<client>.backend` / `<client>.control` layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Well-known path of the client endpoint.
    pub client_socket_path: PathBuf,
    /// File permissions applied to the client endpoint.
    pub client_socket_permissions: u32,
    /// Pidfile guarding against a second daemon instance.
    pub pidfile_path: PathBuf,
    /// Keep running in the foreground instead of daemonizing.
    pub nodaemon: bool,
    /// Accept the SIMULATE control directive.
    pub allow_simulate: bool,
    /// Ticks granted to one in-flight command before it times out.
    pub command_timeout_ticks: i32,
    /// Length of one heartbeat tick.
    pub tick_interval: std::time::Duration,
}

impl RuntimeConfig {
    /// Returns the backend registration endpoint path.
    #[must_use]
    pub fn backend_socket_path(&self) -> PathBuf {
        append_suffix(&self.client_socket_path, ".backend")
    }

    /// Returns the control endpoint path.
    #[must_use]
    pub fn control_socket_path(&self) -> PathBuf {
        append_suffix(&self.client_socket_path, ".control")
    }

    /// Returns the event fifo path reserved for the backend behind `cmd_handle`.
    #[must_use]
    pub fn data_fifo_path(&self, cmd_handle: Handle) -> PathBuf {
        append_suffix(&self.client_socket_path, &format!("-data-{cmd_handle}"))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            client_socket_path: PathBuf::from("/var/run/lirc/lircd"),
            client_socket_permissions: 0o666,
            pidfile_path: PathBuf::from("/var/run/lirc/lircd.pid"),
            nodaemon: false,
            allow_simulate: false,
            command_timeout_ticks: COMMAND_TIMEOUT_TICKS,
            tick_interval: TICK_INTERVAL,
        }
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut joined = path.to_path_buf().into_os_string();
    joined.push(suffix);
    PathBuf::from(joined)
}
