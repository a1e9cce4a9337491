//! Cross-process advisory lock keyed by board serial number.
//!
//! Two host processes talking to the same board would interleave commands on
//! a protocol without request ids, so `open` takes an exclusive `flock` on a
//! per-board file before touching the port. The lock is released when the
//! [`DeviceLock`] is dropped.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::errors::{DriverError, Result};

pub struct DeviceLock {
    key: String,
    path: PathBuf,
    _file: Flock<File>,
}

impl DeviceLock {
    /// Take the lock for `key` without blocking.
    ///
    /// Fails with [`DriverError::Locked`] when another session holds it.
    pub fn acquire(dir: &Path, key: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(lock_file_name(key));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let mut file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(DriverError::Locked(key.to_string()))
            }
            Err((_, errno)) => return Err(std::io::Error::from(errno).into()),
        };

        // Owner pid, for humans inspecting a stuck lock.
        file.set_len(0)?;
        writeln!(&mut *file, "{}", std::process::id())?;

        debug!("acquired device lock {}", path.display());
        Ok(Self {
            key: key.to_string(),
            path,
            _file: file,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for DeviceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLock")
            .field("key", &self.key)
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        debug!("released device lock {}", self.path.display());
    }
}

fn lock_file_name(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("illuminate-{safe}.lock")
}
