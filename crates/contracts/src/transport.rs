//! Transport and payload producer traits
//!
//! Seams to the external HTTP client and the instrumentation layer.

use bytes::Bytes;
use std::collections::HashMap;

use crate::{Destination, TransportOutcome};

/// Delivery transport
///
/// Implemented outside the engine (HTTP client). The engine only ever looks
/// at the returned [`TransportOutcome`] variant. Errors are part of the
/// outcome set, so `send` is infallible at the type level.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Transport name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Attempt one delivery of `payload` to `destination`
    async fn send(
        &self,
        destination: Destination,
        payload: Bytes,
        metadata: &HashMap<String, String>,
    ) -> TransportOutcome;
}

/// Payload handed over by the instrumentation layer
#[derive(Debug, Clone)]
pub struct AssembledPayload {
    pub destination: Destination,
    pub bytes: Bytes,
    pub metadata: HashMap<String, String>,
}

/// Producer of finalized payloads
pub trait PayloadProducer: Send + Sync {
    /// Assemble the next payload, if one is ready
    fn assemble_payload(&self) -> Option<AssembledPayload>;
}
