// Pid lock file and exit-time cleanup

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::DaemonError;

/// Exclusive advisory lock on the pid file, held for the daemon's lifetime
pub struct PidLock {
    file: File,
    path: PathBuf,
}

impl PidLock {
    /// Lock first, then truncate and write our pid, so a racing launcher never
    /// wipes the pid of the daemon that won.
    pub fn acquire(path: &Path) -> Result<Self, DaemonError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.try_lock_exclusive().map_err(DaemonError::LockFailed)?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("[Daemon] Failed to release lock {:?}: {}", self.path, e);
        }
    }
}

/// Removes runtime files when dropped, however the daemon exits.
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("[Daemon] Failed to remove {:?}: {}", path, e),
            }
        }
    }
}
