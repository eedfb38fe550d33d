//! Import batch persistence.
//!
//! Layout: `{base_dir}/{source_id}/batch-{index:08}.json`, one fingerprinted
//! [`ImportBatch`] per file. Files are staged and renamed so a batch is
//! either fully present or absent.

use std::path::{Path, PathBuf};

use crate::error::{ContinuityError, Result};
use crate::ingest::ImportBatch;
use crate::storage::fsutil;

/// Reject source ids that are not safe as a single path component.
pub fn check_source_id(source_id: &str) -> Result<()> {
    let valid = !source_id.is_empty()
        && !source_id.starts_with('.')
        && source_id.len() <= 128
        && source_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ContinuityError::validation(format!(
            "source id '{source_id}' must be 1-128 characters of [A-Za-z0-9._-] not starting with '.'"
        )))
    }
}

/// Directory tree of committed import batches.
pub struct ImportFiles {
    base_dir: PathBuf,
}

impl ImportFiles {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Stage a batch next to its final path.
    pub fn stage(&self, batch: &ImportBatch) -> Result<PathBuf> {
        check_source_id(&batch.source_id)?;
        let json = serde_json::to_vec(batch)
            .map_err(|e| ContinuityError::Serialization(e.to_string()))?;
        fsutil::stage(&self.batch_path(&batch.source_id, batch.index), &json)
    }

    /// Rename a staged batch into place, replacing an orphan left by an
    /// earlier interrupted run.
    pub fn commit(&self, tmp_path: &Path, source_id: &str, index: u64) -> Result<()> {
        fsutil::commit_staged(tmp_path, &self.batch_path(source_id, index))
    }

    pub fn load(&self, source_id: &str, index: u64) -> Result<ImportBatch> {
        check_source_id(source_id)?;
        let path = self.batch_path(source_id, index);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContinuityError::NotFound(format!(
                    "import batch {index} of {source_id} not found"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            ContinuityError::InvalidFileFormat(format!(
                "failed to parse import batch {}: {e}",
                path.display()
            ))
        })
    }

    /// Sorted indexes of every committed batch for `source_id`.
    pub fn indexes(&self, source_id: &str) -> Result<Vec<u64>> {
        check_source_id(source_id)?;
        let dir = self.base_dir.join(source_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut indexes = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(index) = name
                .strip_prefix("batch-")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|digits| digits.parse::<u64>().ok())
            {
                indexes.push(index);
            }
        }
        indexes.sort_unstable();
        Ok(indexes)
    }

    fn batch_path(&self, source_id: &str, index: u64) -> PathBuf {
        self.base_dir
            .join(source_id)
            .join(format!("batch-{index:08}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_rules() {
        assert!(check_source_id("chat-export_2024.v1").is_ok());
        assert!(check_source_id("").is_err());
        assert!(check_source_id("../etc").is_err());
        assert!(check_source_id(".hidden").is_err());
        assert!(check_source_id("a/b").is_err());
    }

    #[test]
    fn test_commit_and_list_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let files = ImportFiles::new(dir.path()).unwrap();
        for index in [2u64, 0, 1] {
            let batch = ImportBatch::seal("src", index, vec![]).unwrap();
            let tmp = files.stage(&batch).unwrap();
            files.commit(&tmp, "src", index).unwrap();
        }
        assert_eq!(files.indexes("src").unwrap(), vec![0, 1, 2]);
        assert_eq!(files.load("src", 1).unwrap().index, 1);
        assert!(files.indexes("other").unwrap().is_empty());
        assert!(matches!(
            files.load("src", 9),
            Err(ContinuityError::NotFound(_))
        ));
    }
}
