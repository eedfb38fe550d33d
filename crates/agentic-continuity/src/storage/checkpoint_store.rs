//! Import checkpoint persistence — `{base_dir}/{source_id}.json`.
//!
//! File format:
//! ```json
//! {
//!     "version": 1,
//!     "checkpoint": { ... ImportCheckpoint ... }
//! }
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ContinuityError, Result};
use crate::ingest::ImportCheckpoint;
use crate::storage::fsutil::write_atomic;
use crate::storage::import_files::check_source_id;

const CHECKPOINT_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    checkpoint: ImportCheckpoint,
}

/// Filesystem-backed store for import checkpoints.
pub struct CheckpointStore {
    base_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Atomically replace the checkpoint for its source.
    pub fn save(&self, checkpoint: &ImportCheckpoint) -> Result<()> {
        check_source_id(&checkpoint.source_id)?;
        let file = CheckpointFile {
            version: CHECKPOINT_FILE_VERSION,
            checkpoint: checkpoint.clone(),
        };
        let json = serde_json::to_vec(&file)
            .map_err(|e| ContinuityError::Serialization(e.to_string()))?;
        write_atomic(&self.checkpoint_path(&checkpoint.source_id), &json)
    }

    /// Load a checkpoint, or `None` when the source was never ingested.
    pub fn load(&self, source_id: &str) -> Result<Option<ImportCheckpoint>> {
        check_source_id(source_id)?;
        let path = self.checkpoint_path(source_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: CheckpointFile = serde_json::from_slice(&bytes).map_err(|e| {
            ContinuityError::InvalidFileFormat(format!(
                "failed to parse checkpoint {}: {e}",
                path.display()
            ))
        })?;
        Ok(Some(file.checkpoint))
    }

    fn checkpoint_path(&self, source_id: &str) -> PathBuf {
        self.base_dir.join(format!("{source_id}.json"))
    }
}
