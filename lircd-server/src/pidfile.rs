//! Unique process instance lock using a regular pidfile.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use lircd_common::error::{LircdError, LircdResult};
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

/// Exclusive advisory lock plus the pid record behind it.
///
/// The lock is held for the daemon's lifetime; dropping the guard releases it and removes the
/// file. `update` rewrites the recorded pid after daemonizing forks the process.
pub struct Pidfile {
    path: PathBuf,
    lock: Flock<File>,
}

impl Pidfile {
    /// Opens (or creates) the pidfile and takes the exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns `LircdError::Io` when the file cannot be created, when another live process
    /// holds the lock, or when a locked file does not carry a parsable pid.
    pub fn acquire(path: &Path) -> LircdResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|error| {
                LircdError::Io(format!(
                    "cannot open or create pidfile {}: {error}",
                    path.display()
                ))
            })?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                let mut pidfile = Self {
                    path: path.to_path_buf(),
                    lock,
                };
                pidfile.update(std::process::id())?;
                debug!(path = %path.display(), "acquired pidfile lock");
                Ok(pidfile)
            }
            Err((_file, _errno)) => {
                let holder = fs::read_to_string(path)
                    .ok()
                    .and_then(|content| content.trim().parse::<u32>().ok());
                match holder {
                    Some(pid) => Err(LircdError::Io(format!(
                        "there seems to already be a lircd process with pid {pid}"
                    ))),
                    None => Err(LircdError::Io(format!(
                        "invalid pidfile {} held by another process",
                        path.display()
                    ))),
                }
            }
        }
    }

    /// Rewrites the recorded pid, after daemonizing re-parents the process.
    ///
    /// # Errors
    ///
    /// Returns `LircdError::Io` when the pidfile cannot be rewritten.
    pub fn update(&mut self, pid: u32) -> LircdResult<()> {
        let file: &mut File = &mut self.lock;
        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| writeln!(file, "{pid}"))
            .and_then(|()| file.flush())
            .map_err(|error| {
                LircdError::Io(format!(
                    "cannot rewrite pidfile {}: {error}",
                    self.path.display()
                ))
            })
    }
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path)
            && error.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), %error, "cannot remove pidfile");
        }
    }
}
