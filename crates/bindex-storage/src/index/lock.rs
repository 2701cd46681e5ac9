//! Advisory lock file, `<dir>/<name>.<ext>.lock`.
//!
//! The lock is a plain file created exclusively. Holders remove it on drop.
//! Nothing waits for a lock to clear.

use bindex_common::{BindexError, IndexConfig, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A held index lock. Dropping it removes the lock file.
#[derive(Debug)]
pub struct IndexLock {
    path: PathBuf,
}

impl IndexLock {
    /// Creates the lock file of the index described by `config`, failing
    /// with `IndexLocked` if it exists.
    pub fn acquire(config: &IndexConfig) -> Result<Self> {
        let path = config.lock_path();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => BindexError::IndexLocked(path.display().to_string()),
                _ => BindexError::Io(e),
            })?;
        writeln!(file, "{}", std::process::id())?;
        tracing::debug!(path = %path.display(), "acquired index lock");
        Ok(Self { path })
    }

    /// Returns true if the index described by `config` is locked.
    pub fn test(config: &IndexConfig) -> bool {
        config.lock_path().exists()
    }

    /// Returns the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove index lock");
        }
    }
}
