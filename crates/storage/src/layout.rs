//! Durable directory layout
//!
//! ```text
//! <root>/
//!   sessions/index.json
//!   sessions/payloads/<ref>.bin
//!   logs/...
//!   crashes/...
//!   snapshots/<name>.snapshot
//! ```
//!
//! `<root>` must be a telemetry-specific directory, never an OS cache
//! directory that may be evicted.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use contracts::{CallRef, Destination};

use crate::StoreError;

const INDEX_FILE: &str = "index.json";
const PAYLOAD_DIR: &str = "payloads";
const PAYLOAD_EXT: &str = "bin";
const SNAPSHOT_DIR: &str = "snapshots";

#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn destination_dir(&self, destination: Destination) -> PathBuf {
        self.root.join(destination.as_str())
    }

    pub fn index_path(&self, destination: Destination) -> PathBuf {
        self.destination_dir(destination).join(INDEX_FILE)
    }

    pub fn payload_dir(&self, destination: Destination) -> PathBuf {
        self.destination_dir(destination).join(PAYLOAD_DIR)
    }

    pub fn payload_path(&self, destination: Destination, payload_ref: &CallRef) -> PathBuf {
        self.payload_dir(destination)
            .join(format!("{payload_ref}.{PAYLOAD_EXT}"))
    }

    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.root.join(SNAPSHOT_DIR).join(format!("{name}.snapshot"))
    }

    /// Create every destination directory
    pub fn ensure_dirs(&self) -> Result<(), StoreError> {
        for destination in Destination::ALL {
            let dir = self.payload_dir(destination);
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Payload reference encoded in a payload file name, if it is one
    pub(crate) fn payload_ref_of(path: &Path) -> Option<CallRef> {
        if path.extension().and_then(|e| e.to_str()) != Some(PAYLOAD_EXT) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let payload_ref = CallRef::new(stem);
        payload_ref.is_file_safe().then_some(payload_ref)
    }
}

/// Write `bytes` to `path` and fsync it
pub(crate) fn write_durable(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(path, e))?;
    file.sync_all().map_err(|e| StoreError::io(path, e))
}

/// Replace `path` atomically (temp file + rename)
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp_path = path.with_extension("tmp");
    write_durable(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path, e))
}

/// Remove a file, treating "already gone" as success
pub(crate) fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}
