//! ConfigSource - pull-based configuration seam
//!
//! Components ask for the values they need when they need them (startup,
//! session boundary). Nothing is pushed.

use std::sync::{PoisonError, RwLock};

use crate::{DeliveryConfig, NetworkLimits};

/// Pull-based configuration provider
pub trait ConfigSource: Send + Sync {
    /// Current admission limits
    fn network_limits(&self) -> NetworkLimits;

    /// Current snapshot cadence (ms)
    fn snapshot_interval_ms(&self) -> u64;
}

/// In-memory configuration that can be swapped at runtime
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    config: RwLock<DeliveryConfig>,
}

impl StaticConfigSource {
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Replace the configuration (simulates a remote config change)
    pub fn set(&self, config: DeliveryConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Replace only the admission limits
    pub fn set_network_limits(&self, limits: NetworkLimits) {
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .rate_limits = limits;
    }
}

impl ConfigSource for StaticConfigSource {
    fn network_limits(&self) -> NetworkLimits {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rate_limits
            .clone()
    }

    fn snapshot_interval_ms(&self) -> u64 {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
            .interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_network_limits_is_visible_on_next_pull() {
        let source = StaticConfigSource::new(DeliveryConfig::default());
        assert_eq!(source.network_limits().default_limit, 1000);

        source.set_network_limits(NetworkLimits {
            default_limit: 5,
            ..Default::default()
        });
        assert_eq!(source.network_limits().default_limit, 5);
        assert_eq!(source.snapshot_interval_ms(), 2_000);
    }
}
