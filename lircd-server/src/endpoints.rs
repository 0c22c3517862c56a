//! Endpoint and fifo setup for the three well-known sockets.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use lircd_common::error::{LircdError, LircdResult};
use mio::net::UnixListener;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tracing::debug;

/// Binds a local listening socket at `path`.
///
/// A pre-existing socket file is replaced, keeping its permissions so a restart does not widen
/// or narrow access; a fresh socket gets `permissions`.
pub fn setup_listener(path: &Path, permissions: u32) -> LircdResult<UnixListener> {
    let prior_mode = match fs::metadata(path) {
        Ok(metadata) => Some(metadata.permissions().mode() & 0o777),
        Err(error) if error.kind() == io::ErrorKind::NotFound => None,
        Err(error) => {
            return Err(LircdError::Io(format!(
                "cannot stat socket path {}: {error}",
                path.display()
            )));
        }
    };
    if prior_mode.is_some() {
        fs::remove_file(path).map_err(|error| {
            LircdError::Io(format!("cannot replace socket {}: {error}", path.display()))
        })?;
    }
    let listener = std::os::unix::net::UnixListener::bind(path).map_err(|error| {
        LircdError::Io(format!("cannot bind socket {}: {error}", path.display()))
    })?;
    listener.set_nonblocking(true).map_err(|error| {
        LircdError::Io(format!("cannot unblock listener {}: {error}", path.display()))
    })?;
    let mode = prior_mode.unwrap_or(permissions);
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|error| {
        LircdError::Io(format!(
            "cannot set permissions on {}: {error}",
            path.display()
        ))
    })?;
    debug!(path = %path.display(), mode = %format!("{mode:o}"), "listener ready");
    Ok(UnixListener::from_std(listener))
}

/// Creates a backend event fifo and opens it for non-blocking reads.
///
/// The fifo stays world-writable only as long as its name exists; the name is unlinked once the
/// backend confirms the data socket.
pub fn create_data_fifo(path: &Path) -> LircdResult<File> {
    if path.exists() {
        fs::remove_file(path).map_err(|error| {
            LircdError::Io(format!("cannot replace stale fifo {}: {error}", path.display()))
        })?;
    }
    mkfifo(path, Mode::from_bits_truncate(0o666)).map_err(|errno| {
        LircdError::Io(format!("cannot create fifo {}: {errno}", path.display()))
    })?;
    let fifo = OpenOptions::new()
        .read(true)
        .custom_flags(nix::libc::O_NONBLOCK)
        .open(path)
        .map_err(|error| {
            LircdError::Io(format!("cannot open fifo {}: {error}", path.display()))
        })?;
    debug!(path = %path.display(), "waiting for event input");
    Ok(fifo)
}

#[cfg(test)]
mod tests {
    use super::{create_data_fifo, setup_listener};
    use googletest::prelude::*;
    use rstest::rstest;
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    #[rstest]
    fn listener_setup_applies_requested_permissions() {
        let dir = tempfile::tempdir().expect("scratch dir");
        let path = dir.path().join("lircd");
        let _listener = setup_listener(&path, 0o660).expect("bind should succeed");
        let mode = std::fs::metadata(&path)
            .expect("socket file exists")
            .permissions()
            .mode();
        assert_that!(mode & 0o777, eq(0o660));
    }

    #[rstest]
    fn rebinding_keeps_the_previous_permissions() {
        let dir = tempfile::tempdir().expect("scratch dir");
        let path = dir.path().join("lircd");
        let first = setup_listener(&path, 0o640).expect("first bind should succeed");
        drop(first);
        let _second = setup_listener(&path, 0o666).expect("rebind should succeed");
        let mode = std::fs::metadata(&path)
            .expect("socket file exists")
            .permissions()
            .mode();
        assert_that!(mode & 0o777, eq(0o640));
    }

    #[rstest]
    fn fifo_is_created_and_replaces_a_stale_name() {
        let dir = tempfile::tempdir().expect("scratch dir");
        let path = dir.path().join("lircd-data-4");
        std::fs::write(&path, b"stale").expect("plant a stale file");
        let _fifo = create_data_fifo(&path).expect("fifo setup should succeed");
        let file_type = std::fs::metadata(&path).expect("fifo exists").file_type();
        assert_that!(file_type.is_fifo(), eq(true));
    }
}
