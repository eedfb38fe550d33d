//! Data structures for batch ingestion.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::error::Result;

/// One message from an external corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestMessage {
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl IngestMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            author: None,
            timestamp: None,
        }
    }

    /// Whitespace-collapsed text used for the content digest.
    pub fn normalized_text(&self) -> String {
        self.text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// BLAKE3 hex digest of the normalized text.
    pub fn content_hash(&self) -> String {
        blake3::hash(self.normalized_text().as_bytes())
            .to_hex()
            .to_string()
    }
}

/// A message as stored inside an import batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedMessage {
    pub content_hash: String,
    pub text: String,
    pub author: Option<String>,
    pub timestamp: Option<u64>,
    pub embedding: Vec<f32>,
}

/// One committed batch, written as a single fingerprinted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub source_id: String,
    pub index: u64,
    pub created_at: u64,
    pub messages: Vec<ImportedMessage>,
    /// SHA-256 of the canonical batch minus this field.
    pub fingerprint: String,
}

impl ImportBatch {
    /// Build a batch and seal it with its fingerprint.
    pub fn seal(source_id: &str, index: u64, messages: Vec<ImportedMessage>) -> Result<Self> {
        let mut batch = Self {
            source_id: source_id.to_string(),
            index,
            created_at: crate::time::now_micros(),
            messages,
            fingerprint: String::new(),
        };
        batch.fingerprint = batch.compute_fingerprint()?;
        Ok(batch)
    }

    pub fn compute_fingerprint(&self) -> Result<String> {
        canonical::fingerprint_excluding(self, "", &["fingerprint"])
    }
}

/// Progress state of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Completed,
    /// Stopped after a batch could not be written; resumable.
    Halted,
}

/// Durable progress marker for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportCheckpoint {
    pub source_id: String,
    pub next_batch_index: u64,
    pub processed_count: u64,
    /// Malformed messages skipped so far.
    pub skipped_count: u64,
    pub seen_content_hashes: BTreeSet<String>,
    pub status: CheckpointStatus,
    pub updated_at: u64,
}

impl ImportCheckpoint {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            next_batch_index: 0,
            processed_count: 0,
            skipped_count: 0,
            seen_content_hashes: BTreeSet::new(),
            status: CheckpointStatus::InProgress,
            updated_at: crate::time::now_micros(),
        }
    }
}

/// Summary of one `ingest` or `resume` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub source_id: String,
    pub status: CheckpointStatus,
    /// Batches committed during this call.
    pub batches_committed: u64,
    /// Messages committed during this call.
    pub messages_committed: u64,
    /// Total committed messages for the source.
    pub processed_count: u64,
    /// Messages skipped because their content hash was already recorded.
    pub duplicates_skipped: u64,
    /// Messages skipped as malformed during this call.
    pub malformed_skipped: u64,
    pub cancelled: bool,
}

/// Result of cross-checking an import against the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportVerification {
    pub source_id: String,
    pub ok: bool,
    pub expected_count: u64,
    pub actual_count: u64,
    /// Batch indexes whose fingerprints were recomputed.
    pub sampled_batches: Vec<u64>,
}

/// Cooperative cancellation flag, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
