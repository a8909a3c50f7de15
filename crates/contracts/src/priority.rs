//! TaskPriority - scheduling classes with aging thresholds

use serde::{Deserialize, Serialize};

/// Priority class of a scheduled task.
///
/// Each class carries an aging offset: a task is ordered by
/// `submission_time + delay_threshold_ms`, so a lower-class task that has
/// waited longer than the difference between two thresholds runs first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    /// Aging offset in milliseconds
    pub const fn delay_threshold_ms(&self) -> i64 {
        match self {
            Self::Critical => 0,
            Self::High => 1_000,
            Self::Normal => 30_000,
            Self::Low => 60_000,
        }
    }

    /// Timestamp used for ordering a task submitted at `submitted_at_ms`
    #[inline]
    pub const fn aged_timestamp(&self, submitted_at_ms: i64) -> i64 {
        submitted_at_ms.saturating_add(self.delay_threshold_ms())
    }
}
