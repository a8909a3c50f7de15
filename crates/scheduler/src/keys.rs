//! Ordering keys
//!
//! Smaller keys run first. Ties are broken by insertion order in the queue,
//! so both keys are strict weak orderings with stable ties.

use contracts::TaskPriority;

/// Priority class key with aging.
///
/// Compares `submitted_at_ms + delay_threshold_ms` first and the priority
/// class second: a LOW task submitted long enough ago overtakes a CRITICAL
/// task submitted now, a fresh LOW task never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AgedPriority {
    aged_timestamp_ms: i64,
    priority: TaskPriority,
}

impl AgedPriority {
    pub fn new(priority: TaskPriority, submitted_at_ms: i64) -> Self {
        Self {
            aged_timestamp_ms: priority.aged_timestamp(submitted_at_ms),
            priority,
        }
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn aged_timestamp_ms(&self) -> i64 {
        self.aged_timestamp_ms
    }
}

/// Session payloads before non-session payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionFirst {
    // false sorts first
    non_session: bool,
}

impl SessionFirst {
    pub fn new(is_session_payload: bool) -> Self {
        Self {
            non_session: !is_session_payload,
        }
    }

    pub fn is_session_payload(&self) -> bool {
        !self.non_session
    }
}
