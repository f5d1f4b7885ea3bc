//! Error types for the store

use std::path::PathBuf;

/// Store-layer errors
///
/// `PersistenceFailed` is fatal to the current increment; it is surfaced, not
/// retried, and prior work stays on disk untouched.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Atomic write could not complete
    #[error("persistence failed for {path}: {source}")]
    PersistenceFailed {
        /// Intended final path
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Plain I/O failure outside the atomic write path
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Increment file exists but its header or checksum is unusable
    #[error("corrupt increment file {path}: {reason}")]
    CorruptIncrement {
        /// Offending file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Manifest violates its own invariants
    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    /// Session directory does not exist
    #[error("no persisted data for session {0}")]
    SessionNotFound(String),

    /// JSON (de)serialization failure
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
