//! Session management for the WhatsApp browser profile
//!
//! Provides:
//! - File-based session locking to prevent parallel execution
//! - Detection of a previously persisted login

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Session lock guard that ensures exclusive access to one browser profile.
#[derive(Debug)]
pub struct SessionLock {
    lock_file: Option<File>,
    path: PathBuf,
}

impl SessionLock {
    /// Acquire an exclusive lock for the configured client id.
    pub fn acquire(config: &Config) -> Result<Self> {
        Self::acquire_at(&config.lock_path())
    }

    /// Acquire an exclusive lock on an explicit lock file path.
    pub fn acquire_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| Error::LockError(format!("Failed to create {}: {}", parent.display(), e)))?;
        }

        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "session lock acquired");
                Ok(Self {
                    lock_file: Some(lock_file),
                    path: path.to_path_buf(),
                })
            }
            Err(_) => {
                eprintln!(
                    r#"
⚠️  The WhatsApp session at {} is already in use by another process.

Only one sender may drive a browser profile at a time.
Wait for the other run to finish and try again.
"#,
                    path.display()
                );
                Err(Error::SessionLocked)
            }
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Whether a browser profile from an earlier login exists for this client id.
pub fn has_cached_session(config: &Config) -> bool {
    let dir = config.session_dir();
    fs::read_dir(&dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
