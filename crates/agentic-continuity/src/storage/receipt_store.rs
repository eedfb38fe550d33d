//! Receipt persistence — store and retrieve `ResurrectionReceipt` records.
//!
//! Each receipt is stored as a single JSON file named `{receipt_id}.json`
//! inside the configured base directory.
//!
//! File format:
//! ```json
//! {
//!     "version": 1,
//!     "receipt": { ... ResurrectionReceipt ... }
//! }
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ContinuityError, Result};
use crate::resurrection::{ReceiptId, ResurrectionReceipt};
use crate::storage::fsutil::write_atomic;

// ── File format constants ─────────────────────────────────────────────────────

const RECEIPT_FILE_VERSION: u32 = 1;

// ── On-disk structure ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ReceiptFile {
    version: u32,
    receipt: ResurrectionReceipt,
}

// ── ReceiptStore ──────────────────────────────────────────────────────────────

/// Filesystem-backed store for resurrection receipts.
///
/// Receipts are write-once: saving an id that already exists is rejected.
pub struct ReceiptStore {
    base_dir: PathBuf,
}

impl ReceiptStore {
    /// Create a new `ReceiptStore` rooted at `base_dir`, creating the
    /// directory if needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Persist a receipt to `{base_dir}/{receipt_id}.json`.
    pub fn save(&self, receipt: &ResurrectionReceipt) -> Result<()> {
        let path = self.receipt_path(&receipt.id);
        if path.exists() {
            return Err(ContinuityError::Persistence(format!(
                "receipt {} already exists",
                receipt.id
            )));
        }

        let file = ReceiptFile {
            version: RECEIPT_FILE_VERSION,
            receipt: receipt.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| ContinuityError::Serialization(e.to_string()))?;
        write_atomic(&path, json.as_bytes())
    }

    /// Load a receipt by its ID.
    pub fn load(&self, id: &ReceiptId) -> Result<ResurrectionReceipt> {
        let path = self.receipt_path(id);

        if !path.exists() {
            return Err(ContinuityError::NotFound(format!("receipt not found: {id}")));
        }

        let bytes = std::fs::read(&path)?;
        let file: ReceiptFile = serde_json::from_slice(&bytes).map_err(|e| {
            ContinuityError::InvalidFileFormat(format!(
                "failed to parse receipt file {}: {e}",
                path.display()
            ))
        })?;

        Ok(file.receipt)
    }

    /// List the IDs of all stored receipts, sorted.
    pub fn list(&self) -> Result<Vec<ReceiptId>> {
        let mut ids = Vec::new();

        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            if let Some(stem) = name_str.strip_suffix(".json") {
                if stem.starts_with("arcpt_") {
                    ids.push(ReceiptId(stem.to_string()));
                }
            }
        }

        ids.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ids)
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn receipt_path(&self, id: &ReceiptId) -> PathBuf {
        self.base_dir.join(format!("{}.json", id.0))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
