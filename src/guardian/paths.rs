//! Runtime artefact paths derived from the project root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where the guardian keeps its lock, control channel and log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
    pipe_path: PathBuf,
    log_path: PathBuf,
}

impl RuntimePaths {
    /// Paths under `<project>/runtime`. Nothing is created on disk.
    pub fn for_project(project: &Path) -> Self {
        let runtime_dir = project.join("runtime");
        Self {
            lock_path: runtime_dir.join("ripple.lock"),
            pipe_path: runtime_dir.join("ripple.pipe"),
            log_path: runtime_dir.join("logs").join("ripple.log"),
            runtime_dir,
        }
    }

    /// Create the runtime and log directories.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.runtime_dir)?;
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Lock file guarding singleton startup.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Control channel special file.
    pub fn pipe_path(&self) -> &Path {
        &self.pipe_path
    }

    /// Output of a daemonized guardian.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
