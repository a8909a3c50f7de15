//! LogErrorSink - internal errors to tracing and metrics

use contracts::{InternalErrorKind, InternalErrorSink};
use tracing::error;

/// Default internal-error sink of the engine
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl LogErrorSink {
    pub fn new() -> Self {
        Self
    }
}

impl InternalErrorSink for LogErrorSink {
    fn track_internal_error(&self, kind: InternalErrorKind, error: &(dyn std::error::Error + 'static)) {
        error!(kind = %kind, error = %error, "Internal delivery error");
        observability::record_internal_error(kind);
    }
}
