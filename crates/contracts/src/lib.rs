//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the delivery engine.
//! Business crates depend only on this crate, never on each other's internals.
//!
//! ## Time Model
//! - Wall-clock milliseconds since the Unix epoch (`i64`) are used for
//!   enqueue times, retry deadlines and scheduling ages
//! - All time reads go through the [`Clock`] seam so tests can drive time

mod call_ref;
mod clock;
mod config;
mod config_source;
mod destination;
mod error;
mod error_sink;
mod outcome;
mod pending_call;
mod priority;
mod snapshot;
mod transport;

pub use call_ref::CallRef;
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::*;
pub use config_source::{ConfigSource, StaticConfigSource};
pub use destination::Destination;
pub use error::*;
pub use error_sink::{InternalErrorKind, InternalErrorSink, RecordedError, RecordingErrorSink};
pub use outcome::{RetryDecision, TransportOutcome};
pub use pending_call::PendingCall;
pub use priority::TaskPriority;
pub use snapshot::Snapshot;
pub use transport::{AssembledPayload, LocalTransport, PayloadProducer, Transport};
