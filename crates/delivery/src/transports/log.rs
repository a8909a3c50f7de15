//! LogTransport - logs every call via tracing and reports success

use std::collections::HashMap;

use bytes::Bytes;
use contracts::{Destination, Transport, TransportOutcome};
use tracing::{info, instrument};

/// Transport that accepts everything (dry runs, debugging)
pub struct LogTransport {
    name: String,
}

impl LogTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Transport for LogTransport {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_transport_send",
        skip(self, payload, metadata),
        fields(transport = %self.name, destination = %destination)
    )]
    async fn send(
        &self,
        destination: Destination,
        payload: Bytes,
        metadata: &HashMap<String, String>,
    ) -> TransportOutcome {
        info!(
            transport = %self.name,
            path = %destination.path(),
            bytes = payload.len(),
            headers = metadata.len(),
            "Payload delivered"
        );
        TransportOutcome::Success {
            body: Bytes::new(),
            headers: HashMap::new(),
        }
    }
}
