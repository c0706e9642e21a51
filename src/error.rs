//! Crate-wide error taxonomy.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by `vecgraph` operations.
///
/// Each variant carries a stable `[VG-0XX]` code in its message so logs and
/// downstream tooling can match on code rather than message text.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying filesystem I/O failure: missing file, permission denied, disk full.
    #[error("[VG-001] io error at {path}: {source}")]
    Io {
        /// Path the operation was acting on.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Bad magic, unknown format version, truncated file, or header/body size mismatch.
    #[error("[VG-002] corrupted database file {path}: {reason}")]
    Corruption {
        /// File that failed validation.
        path: PathBuf,
        /// Human-readable description of what failed.
        reason: String,
    },

    /// Dimension mismatch, empty vector, non-positive k, or a nonsensical filter.
    /// Raised synchronously, before any state change.
    #[error("[VG-003] invalid argument: {0}")]
    InvalidArgument(String),

    /// Query vector dimension did not match the database's fixed dimension.
    #[error("[VG-004] dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension fixed at database creation.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// Insert would grow the arena past an administrator-configured hard cap.
    #[error("[VG-005] capacity exceeded: {0}")]
    Capacity(String),

    /// Attempted to open for write while another process holds the write lock.
    #[error("[VG-006] database is locked for write by another process: {path}")]
    Concurrency {
        /// Path to the lockfile sentinel.
        path: PathBuf,
    },

    /// Operation against an unknown or tombstoned id in strict mode.
    #[error("[VG-007] id not found: {0}")]
    NotFound(u32),

    /// Configuration failed validation.
    #[error("[VG-008] configuration error: {0}")]
    Config(String),

    /// Internal invariant violation: indicates a bug, not caller misuse.
    #[error("[VG-009] internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a caller could plausibly retry or work around this error.
    ///
    /// `Corruption` and `Internal` indicate the database handle (or file) is
    /// no longer trustworthy; everything else is a normal operational error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Corruption { .. } | Self::Internal(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corruption {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
