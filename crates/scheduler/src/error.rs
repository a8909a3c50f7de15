//! Scheduler error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler no longer accepts work
    #[error("scheduler is shut down")]
    ShutDown,

    /// Pool created without workers
    #[error("worker pool needs at least one worker")]
    NoWorkers,
}
