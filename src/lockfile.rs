//! Per-database OS advisory write lock.
//!
//! A sentinel file (`lockfile`, empty content) that exactly one process at a
//! time can hold exclusively, via `fs4`'s cross-platform
//! `try_lock_exclusive`. Released automatically when the handle drops.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::error::{Error, Result};

/// An exclusively held advisory lock on a database directory's `lockfile`.
pub struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    /// Acquires the exclusive lock on `path`, creating the sentinel if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Concurrency`] if another process already holds it,
    /// or [`Error::Io`] if the sentinel can't be created/opened.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { path, file }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(Error::Concurrency { path })
            }
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    /// The sentinel file's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
