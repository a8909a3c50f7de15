//! DeliveryConfig - Config Loader output
//!
//! Describes storage location, worker pool size, admission limits, snapshot
//! cadence, retry policy and per-destination queue caps. Every field has a
//! default so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::Destination;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete delivery engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Telemetry-specific durable directory (not an OS cache directory)
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Delivery worker pool size
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Admission limits
    #[serde(default)]
    pub rate_limits: NetworkLimits,

    /// Periodic snapshot settings
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Maximum pending calls per destination (missing entries use the
    /// destination default)
    #[serde(default)]
    pub queue_limits: HashMap<Destination, usize>,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./telemetry-store")
}

fn default_workers() -> usize {
    2
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            version: ConfigVersion::default(),
            storage_dir: default_storage_dir(),
            workers: default_workers(),
            rate_limits: NetworkLimits::default(),
            snapshot: SnapshotConfig::default(),
            retry: RetryConfig::default(),
            queue_limits: HashMap::new(),
        }
    }
}

impl DeliveryConfig {
    /// Effective pending-call cap for `destination`
    pub fn max_pending(&self, destination: Destination) -> usize {
        self.queue_limits
            .get(&destination)
            .copied()
            .unwrap_or_else(|| destination.default_max_pending())
    }
}

/// Admission limits for captured network calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLimits {
    /// Limit applied to keys with no matching suffix
    #[serde(default = "default_rate_limit")]
    pub default_limit: u32,

    /// Per domain-suffix limits
    #[serde(default)]
    pub domain_suffix_limits: HashMap<String, u32>,
}

fn default_rate_limit() -> u32 {
    1000
}

impl Default for NetworkLimits {
    fn default() -> Self {
        Self {
            default_limit: default_rate_limit(),
            domain_suffix_limits: HashMap::new(),
        }
    }
}

/// Periodic snapshot settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Delay between snapshot invocations (ms)
    #[serde(default = "default_snapshot_interval_ms")]
    pub interval_ms: u64,
}

fn default_snapshot_interval_ms() -> u64 {
    2_000
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_snapshot_interval_ms(),
        }
    }
}

/// Retry policy for retryable outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff after the first failed attempt (ms)
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling (ms)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Minimum delay between two attempts of one call (ms)
    #[serde(default = "default_min_retry_delay_ms")]
    pub min_retry_delay_ms: u64,

    /// Failed attempts after which a call is dropped (None = never)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

fn default_initial_backoff_ms() -> u64 {
    60_000
}

fn default_max_backoff_ms() -> u64 {
    3_600_000
}

fn default_min_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> Option<u32> {
    Some(10)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            min_retry_delay_ms: default_min_retry_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: DeliveryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DeliveryConfig::default());
        assert_eq!(config.rate_limits.default_limit, 1000);
        assert_eq!(config.retry.max_attempts, Some(10));
    }

    #[test]
    fn test_max_pending_falls_back_to_destination_default() {
        let mut config = DeliveryConfig::default();
        assert_eq!(config.max_pending(Destination::Logs), 10);
        config.queue_limits.insert(Destination::Logs, 3);
        assert_eq!(config.max_pending(Destination::Logs), 3);
        assert_eq!(config.max_pending(Destination::Sessions), 100);
    }

    #[test]
    fn test_null_max_attempts_means_unbounded() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_attempts": null}"#).unwrap();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.initial_backoff_ms, 60_000);
    }
}
