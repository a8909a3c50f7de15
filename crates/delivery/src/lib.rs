//! # Delivery
//!
//! Reliable delivery of queued telemetry calls.
//!
//! - [`DeliveryOrchestrator`] drives calls from the durable store through the
//!   priority scheduler to a [`contracts::Transport`]
//! - [`classify`] is the single place that maps a transport outcome to a
//!   retry decision
//! - [`RateLimiter`] bounds how many network calls per domain are captured

mod classifier;
mod error;
mod error_sink;
mod metrics;
mod orchestrator;
mod rate_limiter;
mod retry;
pub mod transports;

pub use classifier::classify;
pub use error::DeliveryError;
pub use error_sink::LogErrorSink;
pub use metrics::{DeliveryMetrics, MetricsSnapshot};
pub use orchestrator::{CycleReport, DeliveryOrchestrator, DeliveryOrchestratorBuilder, Transition};
pub use rate_limiter::{DomainRateState, RateLimiter, MAX_TRACKED_KEYS};
pub use retry::{RetryPolicy, RetryState};
