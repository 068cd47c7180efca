//! Singleton guard: an exclusive advisory lock on the lock file.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

#[derive(Debug)]
pub enum LockError {
    /// Another process holds the lock.
    AlreadyRunning,
    Io { path: PathBuf, error: io::Error },
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::AlreadyRunning => write!(f, "the server is already running"),
            LockError::Io { path, error } => {
                write!(f, "cannot lock {}: {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Io { error, .. } => Some(error),
            LockError::AlreadyRunning => None,
        }
    }
}

/// Held for the lifetime of a running guardian. The file is removed and
/// the lock released on drop.
///
/// Removal happens while the lock is still held, so a starter racing with
/// shutdown can end up locking an unlinked inode. `acquire` therefore
/// checks that the locked descriptor is still the file at `path` and
/// retries otherwise.
#[derive(Debug)]
pub struct ServerLock {
    path: PathBuf,
    file: File,
}

impl ServerLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |error| LockError::Io {
            path: path.to_path_buf(),
            error,
        };

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .mode(0o600)
                .open(path)
                .map_err(io_err)?;

            if let Some(lock) = Self::lock_opened(file, path)? {
                debug!(file = %path.display(), "acquired server lock");
                return Ok(lock);
            }
            debug!(file = %path.display(), "lock file replaced while locking, retrying");
        }
    }

    /// Lock an already opened lock file. `Ok(None)` when the path no longer
    /// names the locked inode.
    fn lock_opened(file: File, path: &Path) -> Result<Option<Self>, LockError> {
        let io_err = |error| LockError::Io {
            path: path.to_path_buf(),
            error,
        };

        if !try_lock(&file).map_err(io_err)? {
            return Err(LockError::AlreadyRunning);
        }
        if !names_file(path, &file).map_err(io_err)? {
            // Dropping `file` releases the lock on the orphaned inode.
            return Ok(None);
        }
        Ok(Some(Self {
            path: path.to_path_buf(),
            file,
        }))
    }

    /// Whether some process currently holds the lock. Does not create the
    /// file when it is missing.
    pub fn is_held(path: &Path) -> io::Result<bool> {
        let file = match OpenOptions::new().read(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        // The probe lock is released when `file` closes.
        Ok(!try_lock(&file)?)
    }
}

impl Drop for ServerLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(file = %self.path.display(), error = %error, "failed to remove lock file");
            }
            _ => {}
        }
        // SAFETY: the descriptor is owned by `self.file` and still open.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

/// Whether `path` currently refers to the same inode as `file`.
fn names_file(path: &Path, file: &File) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Non-blocking exclusive flock. Ok(false) when held elsewhere.
fn try_lock(file: &File) -> io::Result<bool> {
    // SAFETY: flock(2) on a descriptor owned by `file`.
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}
