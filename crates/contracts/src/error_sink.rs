//! Internal-error sink
//!
//! Every failure caught inside the engine is reported here instead of being
//! propagated to the host application.

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Site at which an internal error was caught
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalErrorKind {
    /// Snapshot could not be written
    SnapshotWrite,
    /// Snapshot function panicked
    SnapshotPanic,
    /// Durable store could not be read at startup
    StoreLoad,
    /// Durable store could not be written
    StoreWrite,
    /// A delivery task failed or panicked
    DeliveryTask,
    /// A call was dropped after a terminal outcome
    DeliveryDropped,
    /// Configuration could not be refreshed
    Config,
}

impl InternalErrorKind {
    /// Stable name, used as a metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SnapshotWrite => "snapshot_write",
            Self::SnapshotPanic => "snapshot_panic",
            Self::StoreLoad => "store_load",
            Self::StoreWrite => "store_write",
            Self::DeliveryTask => "delivery_task",
            Self::DeliveryDropped => "delivery_dropped",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for InternalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of internal errors
pub trait InternalErrorSink: Send + Sync {
    fn track_internal_error(&self, kind: InternalErrorKind, error: &(dyn std::error::Error + 'static));
}

/// One error captured by [`RecordingErrorSink`]
#[derive(Debug, Clone)]
pub struct RecordedError {
    pub kind: InternalErrorKind,
    pub message: String,
}

/// Sink that keeps every reported error in memory (tests, diagnostics)
#[derive(Debug, Default)]
pub struct RecordingErrorSink {
    errors: Mutex<Vec<RecordedError>>,
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All errors reported so far
    pub fn errors(&self) -> Vec<RecordedError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of errors of `kind`
    pub fn count(&self, kind: InternalErrorKind) -> usize {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl InternalErrorSink for RecordingErrorSink {
    fn track_internal_error(&self, kind: InternalErrorKind, error: &(dyn std::error::Error + 'static)) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedError {
                kind,
                message: error.to_string(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_counts_by_kind() {
        let sink = RecordingErrorSink::new();
        let err = std::io::Error::other("disk full");
        sink.track_internal_error(InternalErrorKind::StoreWrite, &err);
        sink.track_internal_error(InternalErrorKind::StoreWrite, &err);
        sink.track_internal_error(InternalErrorKind::Config, &err);

        assert_eq!(sink.count(InternalErrorKind::StoreWrite), 2);
        assert_eq!(sink.count(InternalErrorKind::SnapshotWrite), 0);
        assert_eq!(sink.errors()[2].message, "disk full");
    }
}
