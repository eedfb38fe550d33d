//! Snapshot persistence — one JSON file per snapshot.
//!
//! File format:
//! ```json
//! {
//!     "version": 1,
//!     "status": "active",
//!     "status_changed_at": null,
//!     "status_reason": null,
//!     "snapshot": { ... Snapshot ... }
//! }
//! ```
//!
//! The lifecycle status lives in the wrapper, outside the fingerprinted
//! document, so deactivation never alters the snapshot itself.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ContinuityError, Result};
use crate::snapshot::{Snapshot, SnapshotId, SnapshotStatus};
use crate::storage::fsutil;

// ── File format constants ─────────────────────────────────────────────────────

const SNAPSHOT_FILE_VERSION: u32 = 1;

// ── On-disk structure ─────────────────────────────────────────────────────────

/// Wrapper written to disk for each snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub version: u32,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub status_changed_at: Option<u64>,
    #[serde(default)]
    pub status_reason: Option<String>,
    pub snapshot: Snapshot,
}

impl SnapshotFile {
    pub fn active(snapshot: Snapshot) -> Self {
        Self {
            version: SNAPSHOT_FILE_VERSION,
            status: SnapshotStatus::Active,
            status_changed_at: None,
            status_reason: None,
            snapshot,
        }
    }
}

// ── SnapshotFiles ─────────────────────────────────────────────────────────────

/// Directory of snapshot files named `{snapshot_id}.json`.
///
/// Writes are staged to a temp file and renamed so that readers never see
/// a partial document.
pub struct SnapshotFiles {
    base_dir: PathBuf,
}

impl SnapshotFiles {
    /// Create the store rooted at `base_dir`, creating the directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Serialize `file` into a staged temp file next to its final path.
    pub fn stage(&self, file: &SnapshotFile) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(file)
            .map_err(|e| ContinuityError::Serialization(e.to_string()))?;
        fsutil::stage(&self.snapshot_path(&file.snapshot.metadata.id), json.as_bytes())
    }

    /// Rename a staged file into place.
    pub fn commit(&self, tmp_path: &Path, id: &SnapshotId) -> Result<()> {
        fsutil::commit_staged(tmp_path, &self.snapshot_path(id))
    }

    /// Load a snapshot wrapper by id.
    pub fn load(&self, id: &SnapshotId) -> Result<SnapshotFile> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Err(ContinuityError::NotFound(format!("snapshot not found: {id}")));
        }
        Self::load_path(&path)
    }

    /// Load a wrapper from an arbitrary path.
    ///
    /// A bare snapshot document (no wrapper) is accepted and treated as
    /// active.
    pub fn load_path(path: &Path) -> Result<SnapshotFile> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContinuityError::NotFound(format!(
                    "snapshot file not found: {}",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
            ContinuityError::InvalidFileFormat(format!(
                "failed to parse snapshot file {}: {e}",
                path.display()
            ))
        })?;
        let parsed = if value.get("snapshot").is_some() {
            serde_json::from_value::<SnapshotFile>(value)
        } else {
            serde_json::from_value::<Snapshot>(value).map(SnapshotFile::active)
        };
        parsed.map_err(|e| {
            ContinuityError::InvalidFileFormat(format!(
                "failed to parse snapshot file {}: {e}",
                path.display()
            ))
        })
    }

    /// Lazily walk the directory, yielding snapshot ids.
    ///
    /// Temp files and other non-snapshot names are skipped.
    pub fn ids(&self) -> Result<impl Iterator<Item = Result<SnapshotId>>> {
        let entries = std::fs::read_dir(&self.base_dir)?;
        Ok(entries.filter_map(|entry| match entry {
            Err(e) => Some(Err(e.into())),
            Ok(entry) => {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.strip_suffix(".json")
                    .filter(|stem| stem.starts_with("asnap_"))
                    .map(|stem| Ok(SnapshotId(stem.to_string())))
            }
        }))
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn snapshot_path(&self, id: &SnapshotId) -> PathBuf {
        self.base_dir.join(format!("{}.json", id.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{
        ContinuityMetadata, PersonalityDimensions, PersonalityProfile, ResurrectionMetadata,
        SnapshotMetadata,
    };
    use std::collections::BTreeMap;

    fn make_snapshot(id: &str) -> Snapshot {
        let mut snapshot = Snapshot {
            metadata: SnapshotMetadata {
                id: SnapshotId(id.to_string()),
                instance_name: "sage".into(),
                created_at: 1,
                version: 1,
                previous_version: None,
                tags: vec![],
                fingerprint: String::new(),
                signer: None,
                signature: None,
            },
            traits: BTreeMap::from([("creativity".to_string(), 0.9)]),
            personality: PersonalityProfile::new("INFJ", PersonalityDimensions::default()),
            memory: BTreeMap::new(),
            continuity: ContinuityMetadata::default(),
            resurrection: ResurrectionMetadata::default(),
        };
        snapshot.metadata.fingerprint = snapshot.compute_fingerprint().unwrap();
        snapshot
    }

    fn store(files: &SnapshotFiles, snap: Snapshot) {
        let id = snap.metadata.id.clone();
        let tmp = files.stage(&SnapshotFile::active(snap)).unwrap();
        files.commit(&tmp, &id).unwrap();
    }

    #[test]
    fn test_stage_commit_load() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::new(dir.path().join("snapshots")).unwrap();
        let snap = make_snapshot("asnap_one");

        let tmp = files.stage(&SnapshotFile::active(snap.clone())).unwrap();
        assert!(!dir.path().join("snapshots/asnap_one.json").exists());
        files.commit(&tmp, &snap.metadata.id).unwrap();

        let loaded = files.load(&snap.metadata.id).unwrap();
        assert_eq!(loaded.snapshot, snap);
        assert_eq!(loaded.status, SnapshotStatus::Active);
    }

    #[test]
    fn test_load_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::new(dir.path()).unwrap();
        assert!(matches!(
            files.load(&SnapshotId("asnap_missing".into())),
            Err(ContinuityError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_bare_document() {
        let dir = tempfile::tempdir().unwrap();
        let snap = make_snapshot("asnap_bare");
        let path = dir.path().join("export.json");
        std::fs::write(&path, serde_json::to_vec(&snap).unwrap()).unwrap();

        let loaded = SnapshotFiles::load_path(&path).unwrap();
        assert_eq!(loaded.snapshot, snap);
    }

    #[test]
    fn test_ids_skip_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::new(dir.path()).unwrap();
        let snap = make_snapshot("asnap_listed");
        store(&files, snap);
        let _staged = files.stage(&SnapshotFile::active(make_snapshot("asnap_staged"))).unwrap();

        let ids: Vec<_> = files.ids().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(ids, vec![SnapshotId("asnap_listed".into())]);
    }

    #[test]
    fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::new(dir.path()).unwrap();
        let snap = make_snapshot("asnap_fmt");
        store(&files, snap);

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("asnap_fmt.json")).unwrap())
                .unwrap();
        assert_eq!(value["version"], SNAPSHOT_FILE_VERSION);
        assert_eq!(value["status"], "active");
        assert!(value["snapshot"]["metadata"].is_object());
    }
}
