//! Core error types for pomolog-core.
//!
//! This module defines the error hierarchy using thiserror. I/O and parse
//! failures are surfaced to callers as values; nothing here is meant to
//! unwind past the library boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for pomolog-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Canonical store, backup and save-queue errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Mirror document errors
    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    /// Bulk transform precondition failures
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Canonical store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Reading the canonical file failed
    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing (temp file, rename) failed; the previous file is untouched
    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The canonical file exists but could not be decoded as a whole
    #[error("Canonical store at {path} is corrupted: {message}")]
    Corrupted { path: PathBuf, message: String },

    /// Copying the canonical file to a backup failed
    #[error("Backup of {path} failed: {source}")]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A previous background save reported a failure
    #[error("Background save failed: {0}")]
    BackgroundSave(String),
}

/// Mirror document errors.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Reading or writing the mirror document failed
    #[error("Mirror document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Non-empty document from which no session could be recovered
    #[error("Mirror document is corrupted: {skipped} line(s) could not be parsed and no sessions were found")]
    Corrupted { skipped: usize },

    /// The change watcher could not be installed
    #[error("Failed to watch {path}: {message}")]
    WatchFailed { path: PathBuf, message: String },
}

/// Bulk transform precondition errors. Raised before anything is mutated.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransformError {
    /// Nothing to operate on
    #[error("Empty selection: {0}")]
    EmptySelection(String),

    /// Daily window with `from >= to`
    #[error("Invalid daily window: {from} must be before {to}")]
    InvalidWindow {
        from: chrono::NaiveTime,
        to: chrono::NaiveTime,
    },

    /// Day range with `first > last`
    #[error("Invalid day range: {first} is after {last}")]
    InvalidDayRange {
        first: chrono::NaiveDate,
        last: chrono::NaiveDate,
    },

    /// Bucket width must be positive
    #[error("Invalid bucket width: {0} seconds")]
    InvalidBucket(i64),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid time range
    #[error("Invalid time range: end_time ({end}) must not precede start_time ({start})")]
    InvalidTimeRange {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },

    /// No session with this id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Only the timer engine may close or reshape the active session
    #[error("Session {0} is active; stop the timer before editing its times")]
    ActiveSession(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_wrap_into_core_error() {
        let err: CoreError = MirrorError::Corrupted { skipped: 3 }.into();
        assert!(matches!(err, CoreError::Mirror(MirrorError::Corrupted { skipped: 3 })));
        assert!(err.to_string().starts_with("Mirror error: "));

        let err: CoreError = TransformError::InvalidBucket(0).into();
        assert_eq!(err.to_string(), "Transform error: Invalid bucket width: 0 seconds");
    }
}
