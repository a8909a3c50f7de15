//! File-backed ConfigSource
//!
//! Re-reads the configuration file on every pull. A read or validation
//! failure keeps the last good configuration and is reported to the
//! internal-error sink.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use contracts::{
    ConfigSource, DeliveryConfig, InternalErrorKind, InternalErrorSink, NetworkLimits,
};
use tracing::warn;

use crate::ConfigLoader;

pub struct FileConfigSource {
    path: PathBuf,
    last_good: Mutex<DeliveryConfig>,
    error_sink: Arc<dyn InternalErrorSink>,
}

impl FileConfigSource {
    /// Create a source for `path`, seeded with `initial`
    pub fn new(
        path: impl Into<PathBuf>,
        initial: DeliveryConfig,
        error_sink: Arc<dyn InternalErrorSink>,
    ) -> Self {
        Self {
            path: path.into(),
            last_good: Mutex::new(initial),
            error_sink,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and return the effective configuration
    pub fn current(&self) -> DeliveryConfig {
        let mut last_good = self.last_good.lock().unwrap_or_else(PoisonError::into_inner);
        match ConfigLoader::load_from_path(&self.path) {
            Ok(config) => {
                *last_good = config.clone();
                config
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Config refresh failed, keeping last good config");
                self.error_sink
                    .track_internal_error(InternalErrorKind::Config, &e);
                last_good.clone()
            }
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn network_limits(&self) -> NetworkLimits {
        self.current().rate_limits
    }

    fn snapshot_interval_ms(&self) -> u64 {
        self.current().snapshot.interval_ms
    }
}
