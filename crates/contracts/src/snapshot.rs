//! Snapshot - in-progress payload captured for crash recovery

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Destination;

/// Point-in-time copy of an in-progress payload (e.g. the current session).
///
/// If the process dies, the last written snapshot is recovered on the next
/// launch and enqueued like any other payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Destination the recovered payload should be sent to
    pub destination: Destination,

    /// Request metadata to enqueue the recovered payload with
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Capture time (ms since epoch)
    pub taken_at_ms: i64,

    /// Serialized payload
    #[serde(skip)]
    pub payload: Bytes,
}

impl Snapshot {
    /// Create a snapshot without metadata
    pub fn new(destination: Destination, taken_at_ms: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            destination,
            metadata: HashMap::new(),
            taken_at_ms,
            payload: payload.into(),
        }
    }
}
