//! Anchor registry persistence — a single JSON document.
//!
//! File format:
//! ```json
//! {
//!     "version": 1,
//!     "registry": { "anchors": { "anchor-x": [ ... InstanceEntry ... ] } }
//! }
//! ```
//!
//! Updates are read-modify-write under an advisory lock file, so concurrent
//! spawns (threads or processes) never lose each other's entries.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::error::{ContinuityError, Result};
use crate::lineage::AnchorRegistry;
use crate::storage::fsutil::{write_atomic, LockFile};

const REGISTRY_FILE_VERSION: u32 = 1;
const REGISTRY_FILE: &str = "anchors.json";
const REGISTRY_LOCK: &str = "anchors.json.lock";

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    registry: AnchorRegistry,
}

/// Filesystem-backed anchor registry.
pub struct RegistryStore {
    path: PathBuf,
    lock_path: PathBuf,
    storage: StorageConfig,
}

impl RegistryStore {
    pub fn new(base_dir: impl Into<PathBuf>, storage: StorageConfig) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            path: base_dir.join(REGISTRY_FILE),
            lock_path: base_dir.join(REGISTRY_LOCK),
            storage,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current registry (empty when the file does not exist yet).
    pub fn load(&self) -> Result<AnchorRegistry> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AnchorRegistry::default())
            }
            Err(e) => return Err(e.into()),
        };
        let file: RegistryFile = serde_json::from_slice(&bytes).map_err(|e| {
            ContinuityError::InvalidFileFormat(format!(
                "failed to parse registry {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(file.registry)
    }

    /// Locked read-modify-write.
    ///
    /// `mutate` runs against a freshly read registry while the lock is held.
    /// If it returns an error nothing is written.
    pub fn update<T>(&self, mutate: impl FnOnce(&mut AnchorRegistry) -> Result<T>) -> Result<T> {
        let _lock = LockFile::acquire(&self.lock_path, &self.storage)?;
        let mut registry = self.load()?;
        let value = mutate(&mut registry)?;

        let file = RegistryFile {
            version: REGISTRY_FILE_VERSION,
            registry,
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| ContinuityError::Serialization(e.to_string()))?;
        write_atomic(&self.path, json.as_bytes()).map_err(ContinuityError::into_persistence)?;
        log::debug!("registry updated at {}", self.path.display());
        Ok(value)
    }
}
