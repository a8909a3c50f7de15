//! PendingCall - a durably queued outgoing request

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{CallRef, Destination};

/// A fully-formed request waiting for successful delivery.
///
/// Immutable once created. Identity is the payload file reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCall {
    /// Destination queue the call belongs to
    pub destination: Destination,

    /// Reference to the payload file on durable storage
    pub payload_ref: CallRef,

    /// Request metadata forwarded to the transport (headers etc.)
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Enqueue time (ms since epoch)
    pub enqueue_time_ms: i64,
}

impl PendingCall {
    /// Whether this call carries session data
    #[inline]
    pub fn is_session_payload(&self) -> bool {
        self.destination.is_session()
    }
}

impl PartialEq for PendingCall {
    fn eq(&self, other: &Self) -> bool {
        self.payload_ref == other.payload_ref
    }
}

impl Eq for PendingCall {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_payload_ref() {
        let a = PendingCall {
            destination: Destination::Logs,
            payload_ref: "r1".into(),
            metadata: HashMap::new(),
            enqueue_time_ms: 1,
        };
        let mut b = a.clone();
        b.enqueue_time_ms = 99;
        assert_eq!(a, b);
    }

    #[test]
    fn test_metadata_defaults_when_absent() {
        let json = r#"{"destination":"sessions","payload_ref":"r2","enqueue_time_ms":5}"#;
        let call: PendingCall = serde_json::from_str(json).unwrap();
        assert!(call.metadata.is_empty());
        assert!(call.is_session_payload());
    }
}
