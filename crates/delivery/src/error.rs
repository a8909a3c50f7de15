//! Delivery error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Durable store failure (enqueue was not persisted)
    #[error("store error: {0}")]
    Store(#[from] storage::StoreError),

    /// Scheduler rejected work
    #[error("scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),

    /// Contract-level error (config etc.)
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// Orchestrator no longer accepts payloads
    #[error("delivery orchestrator is shut down")]
    ShutDown,
}
