//! Storage error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error with the path it happened on
    #[error("io error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Index file could not be decoded
    #[error("corrupt index '{}': {message}", path.display())]
    CorruptIndex { path: PathBuf, message: String },

    /// Payload file of a pending call no longer exists
    #[error("payload '{payload_ref}' is missing")]
    PayloadMissing { payload_ref: String },

    /// Record encoding error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot function panicked
    #[error("snapshot function panicked: {message}")]
    SnapshotPanic { message: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
