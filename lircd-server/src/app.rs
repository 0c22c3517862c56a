//! Process composition root for `lircd-server`.

use lircd_common::config::RuntimeConfig;
use lircd_common::error::{LircdError, LircdResult};
use tracing::info;

use crate::pidfile::Pidfile;
use crate::reactor::DispatcherReactor;

/// Starts the daemon: pidfile, endpoints, optional fork, then the event loop.
///
/// # Errors
///
/// Returns `LircdError::Io` for fatal startup conditions (pidfile held by a live instance,
/// unbindable endpoint) and for unrecoverable loop failures.
pub fn run(config: RuntimeConfig) -> LircdResult<()> {
    let mut pidfile = Pidfile::acquire(&config.pidfile_path)?;
    let mut reactor = DispatcherReactor::bind(config.clone())?;
    if !config.nodaemon {
        nix::unistd::daemon(false, false)
            .map_err(|errno| LircdError::Io(format!("daemon() failed: {errno}")))?;
        pidfile.update(std::process::id())?;
    }
    info!(socket = %config.client_socket_path.display(), "lircd ready");
    reactor.run()
    // The pidfile guard drops here and removes its file.
}
