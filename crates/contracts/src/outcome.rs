//! TransportOutcome - closed set of delivery attempt results
//!
//! The only input to retry decisions. Nothing else may infer
//! retry-worthiness from raw status codes.

use bytes::Bytes;
use std::collections::HashMap;

use crate::Destination;

/// Result of one transport attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    /// 2xx response
    Success {
        body: Bytes,
        headers: HashMap<String, String>,
    },
    /// 304 response
    NotModified,
    /// 413 response
    PayloadTooLarge,
    /// 429 response, optionally with a server retry hint
    TooManyRequests {
        destination: Destination,
        retry_after_ms: Option<i64>,
    },
    /// Any other HTTP status
    Failure {
        status_code: u16,
        headers: HashMap<String, String>,
    },
    /// Transport-level error before a response was read
    Incomplete { error: String },
    /// Connection produced no response at all
    NoResponse,
}

impl TransportOutcome {
    /// Map a raw HTTP status into the closed outcome set.
    ///
    /// `retry_after_ms` is only kept for 429 responses.
    pub fn from_status(
        destination: Destination,
        status_code: u16,
        body: Bytes,
        headers: HashMap<String, String>,
        retry_after_ms: Option<i64>,
    ) -> Self {
        match status_code {
            200..=299 => Self::Success { body, headers },
            304 => Self::NotModified,
            413 => Self::PayloadTooLarge,
            429 => Self::TooManyRequests {
                destination,
                retry_after_ms,
            },
            _ => Self::Failure {
                status_code,
                headers,
            },
        }
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::NotModified => "not_modified",
            Self::PayloadTooLarge => "payload_too_large",
            Self::TooManyRequests { .. } => "too_many_requests",
            Self::Failure { .. } => "failure",
            Self::Incomplete { .. } => "incomplete",
            Self::NoResponse => "no_response",
        }
    }

    /// Whether the collector accepted the payload
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::NotModified)
    }
}

/// Retry decision derived from a [`TransportOutcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryDecision {
    /// Whether the call should stay queued for another attempt
    pub retry: bool,
    /// Server-provided delay before the next attempt
    pub retry_after_ms: Option<i64>,
}
