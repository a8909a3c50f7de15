//! # Scheduler
//!
//! In-memory ordering of delivery work.
//!
//! A [`PriorityQueue`] (binary heap keyed by an ordering key plus an
//! insertion sequence) drained by a fixed pool of tokio workers
//! ([`PriorityScheduler`]). Two keys are provided:
//!
//! - [`AgedPriority`]: priority class with starvation bounded by each
//!   class's delay threshold
//! - [`SessionFirst`]: session payloads ahead of everything else, FIFO
//!   within each group

mod error;
mod keys;
mod pool;
mod queue;

pub use error::SchedulerError;
pub use keys::{AgedPriority, SessionFirst};
pub use pool::{PriorityScheduler, Task};
pub use queue::PriorityQueue;
