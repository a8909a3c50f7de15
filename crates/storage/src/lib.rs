//! # Storage
//!
//! Durable state of the delivery engine.
//!
//! - [`PendingCallStore`]: per-destination queue of outgoing calls, one
//!   index file plus one payload file per call
//! - [`PeriodicSnapshotCache`]: timer-driven snapshot of an in-progress
//!   payload for crash recovery
//!
//! Everything lives under one telemetry-specific directory (see [`StoreLayout`]).

mod error;
mod layout;
mod pending_store;
mod snapshot_cache;

pub use error::StoreError;
pub use layout::StoreLayout;
pub use pending_store::{Enqueued, PendingCallStore};
pub use snapshot_cache::{PeriodicSnapshotCache, SnapshotStats};
