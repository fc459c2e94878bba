//! Error types for classdex operations

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClassdexError {
    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Duplicate symbol {name}: already declared in {}, ignoring {}", .existing.display(), .rejected.display())]
    DuplicateSymbol {
        name: String,
        existing: PathBuf,
        rejected: PathBuf,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Timed out after {waited:?} waiting for another process to build the cache")]
    LockTimeout { waited: Duration },

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reasons a persisted cache could not be used.
///
/// Every variant except `NotFound` means the file on disk is unusable and
/// has been (or should be) deleted before a fresh scan.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("No cache file at {}", .0.display())]
    NotFound(PathBuf),

    #[error("Cache version mismatch: file is {found}, expected {expected}")]
    VersionMismatch { found: String, expected: String },

    #[error("Cache is {age_secs}s old, max age is {max_age_secs}s")]
    Expired { age_secs: u64, max_age_secs: u64 },

    #[error("Corrupt cache file {}: {message}", .path.display())]
    Corrupt { path: PathBuf, message: String },
}

impl CacheError {
    /// Whether the cache file exists but must be discarded
    pub fn is_stale(&self) -> bool {
        !matches!(self, Self::NotFound(_))
    }
}
