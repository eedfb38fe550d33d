//! Batch ingestion pipeline — resumable import of a large message corpus.
//!
//! Messages are digested, de-duplicated, grouped into batches, embedded
//! through a bounded worker pool, and committed one batch at a time. The
//! checkpoint only moves after a batch is durable, so an interrupted import
//! resumes at the last batch boundary.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{IngestConfig, StorageConfig};
use crate::error::{ContinuityError, Result};
use crate::snapshot::SnapshotStore;
use crate::storage::fsutil::with_retry;
use crate::storage::{check_source_id, CheckpointStore};

use super::embedding::{embed_parallel, EmbeddingProvider};
use super::types::*;

/// Actor recorded on import audit entries.
pub const INGEST_ACTOR: &str = "ingest";

/// The Batch Ingestion Pipeline.
pub struct IngestPipeline {
    snapshots: Arc<SnapshotStore>,
    checkpoints: CheckpointStore,
    embedder: Arc<dyn EmbeddingProvider>,
    config: IngestConfig,
    storage: StorageConfig,
}

/// Per-call counters.
#[derive(Default)]
struct Tally {
    batches: u64,
    messages: u64,
    duplicates: u64,
    malformed: u64,
    cancelled: bool,
}

impl IngestPipeline {
    pub fn new(
        snapshots: Arc<SnapshotStore>,
        checkpoints: CheckpointStore,
        embedder: Arc<dyn EmbeddingProvider>,
        config: IngestConfig,
        storage: StorageConfig,
    ) -> Self {
        Self {
            snapshots,
            checkpoints,
            embedder,
            config,
            storage,
        }
    }

    pub fn checkpoint(&self, source_id: &str) -> Result<Option<ImportCheckpoint>> {
        self.checkpoints.load(source_id)
    }

    /// Import `messages` for `source_id`, continuing from an existing
    /// checkpoint when there is one.
    ///
    /// `cancel` is checked before every message; messages of a batch that
    /// has not been committed yet are dropped and re-read on resume.
    pub fn ingest(
        &self,
        source_id: &str,
        messages: impl IntoIterator<Item = IngestMessage>,
        cancel: Option<&CancellationToken>,
    ) -> Result<IngestReport> {
        check_source_id(source_id)?;
        let checkpoint = self
            .checkpoints
            .load(source_id)?
            .unwrap_or_else(|| ImportCheckpoint::new(source_id));
        self.run(checkpoint, messages, cancel)
    }

    /// Continue an interrupted import. The caller replays the full stream;
    /// already-committed messages are skipped by content hash.
    pub fn resume(
        &self,
        source_id: &str,
        messages: impl IntoIterator<Item = IngestMessage>,
        cancel: Option<&CancellationToken>,
    ) -> Result<IngestReport> {
        let checkpoint = self.checkpoints.load(source_id)?.ok_or_else(|| {
            ContinuityError::NotFound(format!("no import checkpoint for '{source_id}'"))
        })?;
        if checkpoint.status == CheckpointStatus::Completed {
            log::info!("import '{source_id}' already completed; nothing to resume");
            return Ok(report(&checkpoint, &Tally::default()));
        }
        log::info!(
            "resuming import '{source_id}' at batch {} ({} messages committed)",
            checkpoint.next_batch_index,
            checkpoint.processed_count
        );
        self.run(checkpoint, messages, cancel)
    }

    /// Cross-check the checkpoint against the committed batches.
    pub fn verify(&self, source_id: &str) -> Result<ImportVerification> {
        let checkpoint = self.checkpoints.load(source_id)?.ok_or_else(|| {
            ContinuityError::NotFound(format!("no import checkpoint for '{source_id}'"))
        })?;

        let indexes = self.snapshots.import_batches(source_id)?;
        let mut actual = 0u64;
        let mut hashes = HashSet::new();
        let mut duplicated = 0u64;
        for &index in &indexes {
            let batch = self.snapshots.load_import_batch(source_id, index)?;
            actual += batch.messages.len() as u64;
            for message in &batch.messages {
                if !hashes.insert(message.content_hash.clone()) {
                    duplicated += 1;
                }
            }
        }

        let expected = checkpoint.processed_count;
        if actual != expected || duplicated > 0 {
            log::warn!(
                "import '{source_id}' mismatch: checkpoint {expected}, store {actual}, {duplicated} duplicated"
            );
            return Err(ContinuityError::IncompleteImport {
                source_id: source_id.to_string(),
                expected,
                actual,
            });
        }

        let sampled: Vec<u64> = indexes
            .iter()
            .rev()
            .take(self.config.spot_sample)
            .rev()
            .copied()
            .collect();
        for &index in &sampled {
            let batch = self.snapshots.load_import_batch(source_id, index)?;
            let recomputed = batch.compute_fingerprint()?;
            if recomputed != batch.fingerprint {
                log::warn!(
                    "import '{source_id}' batch {index} fingerprint mismatch: recorded {}, recomputed {recomputed}",
                    batch.fingerprint
                );
                return Err(ContinuityError::IncompleteImport {
                    source_id: source_id.to_string(),
                    expected,
                    actual,
                });
            }
        }

        Ok(ImportVerification {
            source_id: source_id.to_string(),
            ok: true,
            expected_count: expected,
            actual_count: actual,
            sampled_batches: sampled,
        })
    }

    // ── Batch loop ───────────────────────────────────────────────────────────

    fn run(
        &self,
        mut checkpoint: ImportCheckpoint,
        messages: impl IntoIterator<Item = IngestMessage>,
        cancel: Option<&CancellationToken>,
    ) -> Result<IngestReport> {
        let batch_size = self.config.batch_size.max(1);
        let mut tally = Tally::default();
        let mut pending: Vec<(String, IngestMessage)> = Vec::with_capacity(batch_size);
        let mut pending_hashes: HashSet<String> = HashSet::new();

        checkpoint.status = CheckpointStatus::InProgress;

        for message in messages {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tally.cancelled = true;
                break;
            }
            if message.text.trim().is_empty() {
                tally.malformed += 1;
                log::warn!("import '{}': skipping message with empty text", checkpoint.source_id);
                continue;
            }
            let hash = message.content_hash();
            if checkpoint.seen_content_hashes.contains(&hash) || pending_hashes.contains(&hash) {
                tally.duplicates += 1;
                continue;
            }
            pending_hashes.insert(hash.clone());
            pending.push((hash, message));

            if pending.len() >= batch_size {
                self.flush(&mut checkpoint, &mut pending, &mut tally)?;
                pending_hashes.clear();
            }
        }
        // The stream itself may cancel and then end.
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tally.cancelled = true;
        }

        if tally.cancelled {
            if !pending.is_empty() {
                log::info!(
                    "import '{}' cancelled; dropping {} uncommitted messages",
                    checkpoint.source_id,
                    pending.len()
                );
            }
        } else {
            if !pending.is_empty() {
                self.flush(&mut checkpoint, &mut pending, &mut tally)?;
            }
            checkpoint.status = CheckpointStatus::Completed;
        }

        checkpoint.skipped_count += tally.malformed;
        checkpoint.updated_at = crate::time::now_micros();
        self.save_checkpoint(&checkpoint)?;

        log::info!(
            "import '{}': {} batches / {} messages committed, {} duplicates, {} malformed, status {:?}",
            checkpoint.source_id,
            tally.batches,
            tally.messages,
            tally.duplicates,
            tally.malformed,
            checkpoint.status
        );
        Ok(report(&checkpoint, &tally))
    }

    /// Embed and commit the pending batch, then advance the checkpoint.
    /// On failure the checkpoint is saved as halted at the last good
    /// boundary.
    fn flush(
        &self,
        checkpoint: &mut ImportCheckpoint,
        pending: &mut Vec<(String, IngestMessage)>,
        tally: &mut Tally,
    ) -> Result<()> {
        let index = checkpoint.next_batch_index;
        match self.commit_batch(&checkpoint.source_id, index, pending) {
            Ok(()) => {}
            Err(e) => {
                log::error!(
                    "import '{}' halted at batch {index}: {e}",
                    checkpoint.source_id
                );
                checkpoint.status = CheckpointStatus::Halted;
                checkpoint.updated_at = crate::time::now_micros();
                if let Err(save_err) = self.save_checkpoint(checkpoint) {
                    log::error!("could not record halted checkpoint: {save_err}");
                }
                return Err(e.into_persistence());
            }
        }

        let count = pending.len() as u64;
        checkpoint
            .seen_content_hashes
            .extend(pending.drain(..).map(|(hash, _)| hash));
        checkpoint.next_batch_index += 1;
        checkpoint.processed_count += count;
        checkpoint.updated_at = crate::time::now_micros();
        self.save_checkpoint(checkpoint)?;

        tally.batches += 1;
        tally.messages += count;
        log::debug!(
            "import '{}': batch {index} committed ({count} messages)",
            checkpoint.source_id
        );
        Ok(())
    }

    fn commit_batch(
        &self,
        source_id: &str,
        index: u64,
        pending: &[(String, IngestMessage)],
    ) -> Result<()> {
        let texts: Vec<String> = pending.iter().map(|(_, m)| m.text.clone()).collect();
        let embeddings = with_retry(&self.storage, "embedding batch", || {
            embed_parallel(self.embedder.as_ref(), &texts, self.config.embedding_workers).map_err(
                |e| ContinuityError::Persistence(format!("embedding batch {index} failed: {e}")),
            )
        })?;

        let messages = pending
            .iter()
            .zip(embeddings)
            .map(|((hash, m), embedding)| ImportedMessage {
                content_hash: hash.clone(),
                text: m.text.clone(),
                author: m.author.clone(),
                timestamp: m.timestamp,
                embedding,
            })
            .collect();
        let batch = ImportBatch::seal(source_id, index, messages)?;
        // The store retries its own writes.
        self.snapshots.commit_import_batch(&batch, INGEST_ACTOR)?;
        Ok(())
    }

    fn save_checkpoint(&self, checkpoint: &ImportCheckpoint) -> Result<()> {
        with_retry(&self.storage, "checkpoint save", || {
            self.checkpoints.save(checkpoint)
        })
    }
}

fn report(checkpoint: &ImportCheckpoint, tally: &Tally) -> IngestReport {
    IngestReport {
        source_id: checkpoint.source_id.clone(),
        status: checkpoint.status,
        batches_committed: tally.batches,
        messages_committed: tally.messages,
        processed_count: checkpoint.processed_count,
        duplicates_skipped: tally.duplicates,
        malformed_skipped: tally.malformed,
        cancelled: tally.cancelled,
    }
}
