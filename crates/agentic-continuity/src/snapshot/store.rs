//! Snapshot Store — create, read, list, validate, and deactivate snapshots,
//! plus the import-batch area fed by the ingestion pipeline.
//!
//! Every mutation follows the same commit protocol under the subject's
//! writer lock:
//!
//! 1. stage the new file next to its final path,
//! 2. append the audit entry,
//! 3. rename the staged file into place.
//!
//! If the audit append fails the staged file is discarded and nothing
//! changes. If the rename fails after the entry was written, a compensating
//! `ROLLED_BACK` entry restores the subject's previous state hash.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use crate::audit::{event_types, AuditLog, AuditOutcome, AuditRecord, EventId};
use crate::canonical;
use crate::config::StorageConfig;
use crate::crypto::{random, signing, SignerAnchor};
use crate::error::{ContinuityError, Result};
use crate::ingest::ImportBatch;
use crate::storage::fsutil::{self, with_retry};
use crate::storage::{ImportFiles, SnapshotFile, SnapshotFiles, SubjectLocks};

use super::types::{
    ContinuityMetadata, PersonalityProfile, SignerInfo, Snapshot, SnapshotDraft, SnapshotId,
    SnapshotMetadata, SnapshotStatus, SnapshotSummary, ValidationReport,
};
use super::validate::{validate_draft, validate_snapshot};

/// Suffix that selects the newest snapshot of an instance in [`SnapshotStore::get`].
pub const LATEST_SUFFIX: &str = "@latest";

/// Audit subject used for one import source.
pub fn import_subject(source_id: &str) -> String {
    format!("import:{source_id}")
}

/// State hash the audit log tracks for a stored snapshot.
pub fn state_hash(file: &SnapshotFile) -> String {
    match file.status {
        SnapshotStatus::Active => file.snapshot.metadata.fingerprint.clone(),
        SnapshotStatus::Deactivated => {
            let marker = format!("{}:deactivated", file.snapshot.metadata.fingerprint);
            canonical::sha256_hex(marker.as_bytes())
        }
    }
}

/// Filter for [`SnapshotStore::list`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    pub instance_name: Option<String>,
    pub tag: Option<String>,
    pub include_inactive: bool,
}

impl SnapshotFilter {
    fn matches(&self, file: &SnapshotFile) -> bool {
        let snap = &file.snapshot;
        if !self.include_inactive && file.status != SnapshotStatus::Active {
            return false;
        }
        if let Some(name) = &self.instance_name {
            if &snap.metadata.instance_name != name {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !snap.has_tag(tag) {
                return false;
            }
        }
        true
    }
}

/// Lazy listing: each `next()` reads at most one directory entry and one
/// snapshot file. Call [`SnapshotStore::list`] again to restart.
pub struct SnapshotIter<'a> {
    files: &'a SnapshotFiles,
    ids: Box<dyn Iterator<Item = Result<SnapshotId>> + 'a>,
    filter: SnapshotFilter,
}

impl Iterator for SnapshotIter<'_> {
    type Item = Result<SnapshotSummary>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = match self.ids.next()? {
                Ok(id) => id,
                Err(e) => return Some(Err(e)),
            };
            let file = match self.files.load(&id) {
                Ok(file) => file,
                Err(e) => return Some(Err(e)),
            };
            if self.filter.matches(&file) {
                return Some(Ok(file.snapshot.summary(file.status)));
            }
        }
    }
}

// ── SnapshotStore ─────────────────────────────────────────────────────────────

/// The Snapshot Store component.
pub struct SnapshotStore {
    files: SnapshotFiles,
    imports: ImportFiles,
    audit: Arc<AuditLog>,
    locks: Arc<SubjectLocks>,
    storage: StorageConfig,
}

impl SnapshotStore {
    /// Open the store with `snapshots/` and `imports/` directories.
    pub fn new(
        snapshots_dir: impl Into<PathBuf>,
        imports_dir: impl Into<PathBuf>,
        audit: Arc<AuditLog>,
        locks: Arc<SubjectLocks>,
        storage: StorageConfig,
    ) -> Result<Self> {
        Ok(Self {
            files: SnapshotFiles::new(snapshots_dir)?,
            imports: ImportFiles::new(imports_dir)?,
            audit,
            locks,
            storage,
        })
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    // ── Create ────────────────────────────────────────────────────────────────

    /// Validate a draft and persist it as version 1 of a new snapshot.
    pub fn create(
        &self,
        draft: SnapshotDraft,
        actor: &str,
        signer: Option<&SignerAnchor>,
    ) -> Result<SnapshotId> {
        let snapshot = self.build(draft, 1, None, signer)?;
        self.persist_new(snapshot, actor)
    }

    /// Persist `draft` as the next version of `previous`.
    ///
    /// The previous snapshot is left untouched.
    pub fn create_version(
        &self,
        previous: &SnapshotId,
        draft: SnapshotDraft,
        actor: &str,
        signer: Option<&SignerAnchor>,
    ) -> Result<SnapshotId> {
        let prev = self.files.load(previous)?;
        if prev.status != SnapshotStatus::Active {
            return Err(ContinuityError::validation(format!(
                "cannot version deactivated snapshot {previous}"
            )));
        }
        let snapshot = self.build(
            draft,
            prev.snapshot.metadata.version.saturating_add(1),
            Some(previous.clone()),
            signer,
        )?;
        self.persist_new(snapshot, actor)
    }

    fn build(
        &self,
        draft: SnapshotDraft,
        version: u32,
        previous_version: Option<SnapshotId>,
        signer: Option<&SignerAnchor>,
    ) -> Result<Snapshot> {
        let violations = validate_draft(&draft);
        if !violations.is_empty() {
            return Err(ContinuityError::Validation { violations });
        }

        let created_at = crate::time::now_micros();
        let salt = hex::encode(random::random_salt_16());
        let id = SnapshotId(canonical::derive_id(
            "asnap",
            &format!("{}:{created_at}:{salt}", draft.instance_name),
        ));

        let mut tags = draft.tags;
        tags.sort();
        tags.dedup();

        let mut snapshot = Snapshot {
            metadata: SnapshotMetadata {
                id,
                instance_name: draft.instance_name,
                created_at,
                version,
                previous_version,
                tags,
                fingerprint: String::new(),
                signer: signer.map(|s| SignerInfo {
                    signer_id: s.id(),
                    public_key: s.public_key_base64(),
                }),
                signature: None,
            },
            traits: draft.traits,
            personality: PersonalityProfile::new(draft.personality_type, draft.dimensions),
            memory: draft.memory,
            continuity: ContinuityMetadata {
                anchor_key: draft.anchor_key,
                parent_instance: draft.parent_instance,
                drift_index: draft.drift_index.unwrap_or(0),
            },
            resurrection: draft.resurrection,
        };
        snapshot.metadata.fingerprint = snapshot.compute_fingerprint()?;
        if let Some(signer) = signer {
            snapshot.metadata.signature = Some(signing::sign_to_base64(
                signer.signing_key(),
                snapshot.metadata.fingerprint.as_bytes(),
            ));
        }
        Ok(snapshot)
    }

    fn persist_new(&self, snapshot: Snapshot, actor: &str) -> Result<SnapshotId> {
        let id = snapshot.metadata.id.clone();
        let handle = self.locks.handle(id.as_str());
        let _guard = handle.lock();

        let fingerprint = snapshot.metadata.fingerprint.clone();
        let metadata = json!({
            "instance_name": snapshot.metadata.instance_name,
            "version": snapshot.metadata.version,
            "previous_version": snapshot.metadata.previous_version,
            "signer": snapshot.metadata.signer.as_ref().map(|s| s.signer_id.0.clone()),
        });
        let file = SnapshotFile::active(snapshot);

        with_retry(&self.storage, "snapshot create", || {
            let tmp = self.files.stage(&file)?;
            self.commit_audited(
                &tmp,
                || self.files.commit(&tmp, &id),
                AuditDraft {
                    event_type: event_types::SNAPSHOT_CREATE,
                    subject: id.as_str(),
                    actor,
                    new_hash: &fingerprint,
                    metadata: metadata.clone(),
                },
            )
        })?;

        log::info!("created snapshot {id} ({fingerprint})");
        Ok(id)
    }

    // ── Read ──────────────────────────────────────────────────────────────────

    /// Resolve a locator: a snapshot id, a path to a snapshot document, or
    /// `instance_name@latest`.
    pub fn get(&self, locator: &str) -> Result<Snapshot> {
        Ok(self.get_file(locator)?.snapshot)
    }

    /// Like [`get`](Self::get), also returning the stored status.
    pub fn get_file(&self, locator: &str) -> Result<SnapshotFile> {
        if let Some(name) = locator.strip_suffix(LATEST_SUFFIX) {
            return self.latest(name);
        }
        if locator.starts_with("asnap_") && !locator.contains(['/', '\\']) {
            return self.files.load(&SnapshotId(locator.to_string()));
        }
        let path = Path::new(locator);
        if path.exists() {
            return SnapshotFiles::load_path(path);
        }
        Err(ContinuityError::NotFound(format!("snapshot not found: {locator}")))
    }

    /// Newest active snapshot of `instance_name` by version, then creation time.
    fn latest(&self, instance_name: &str) -> Result<SnapshotFile> {
        let mut best: Option<SnapshotFile> = None;
        for id in self.files.ids()? {
            let file = self.files.load(&id?)?;
            if file.status != SnapshotStatus::Active
                || file.snapshot.metadata.instance_name != instance_name
            {
                continue;
            }
            let newer = best.as_ref().map_or(true, |b| {
                let (bm, fm) = (&b.snapshot.metadata, &file.snapshot.metadata);
                (fm.version, fm.created_at) > (bm.version, bm.created_at)
            });
            if newer {
                best = Some(file);
            }
        }
        best.ok_or_else(|| {
            ContinuityError::NotFound(format!("no active snapshot for instance '{instance_name}'"))
        })
    }

    /// Lazily list snapshot summaries matching `filter`.
    pub fn list(&self, filter: SnapshotFilter) -> Result<SnapshotIter<'_>> {
        Ok(SnapshotIter {
            files: &self.files,
            ids: Box::new(self.files.ids()?),
            filter,
        })
    }

    /// Structural, fingerprint, signature, and routine checks.
    pub fn validate(&self, snapshot: &Snapshot) -> ValidationReport {
        validate_snapshot(snapshot)
    }

    pub fn status(&self, id: &SnapshotId) -> Result<SnapshotStatus> {
        Ok(self.files.load(id)?.status)
    }

    // ── Deactivate ────────────────────────────────────────────────────────────

    /// Mark a snapshot inactive. The document and its fingerprint are kept.
    pub fn deactivate(&self, id: &SnapshotId, actor: &str, reason: &str) -> Result<EventId> {
        let handle = self.locks.handle(id.as_str());
        let _guard = handle.lock();

        let mut file = self.files.load(id)?;
        if file.status == SnapshotStatus::Deactivated {
            return Err(ContinuityError::validation(format!(
                "snapshot {id} is already deactivated"
            )));
        }
        file.status = SnapshotStatus::Deactivated;
        file.status_changed_at = Some(crate::time::now_micros());
        file.status_reason = Some(reason.to_string());
        let new_hash = state_hash(&file);

        let event_id = with_retry(&self.storage, "snapshot deactivate", || {
            let tmp = self.files.stage(&file)?;
            self.commit_audited(
                &tmp,
                || self.files.commit(&tmp, id),
                AuditDraft {
                    event_type: event_types::SNAPSHOT_DEACTIVATE,
                    subject: id.as_str(),
                    actor,
                    new_hash: &new_hash,
                    metadata: json!({ "reason": reason }),
                },
            )
        })?;

        log::info!("deactivated snapshot {id}");
        Ok(event_id)
    }

    // ── Import area ───────────────────────────────────────────────────────────

    /// Durably write one import batch and audit it.
    ///
    /// Re-committing an index that already exists (an orphan from an
    /// interrupted run) replaces it.
    pub fn commit_import_batch(&self, batch: &ImportBatch, actor: &str) -> Result<EventId> {
        let subject = import_subject(&batch.source_id);
        let handle = self.locks.handle(&subject);
        let _guard = handle.lock();

        let actual = batch.compute_fingerprint()?;
        if actual != batch.fingerprint {
            return Err(ContinuityError::Integrity {
                subject: format!("{subject}#{}", batch.index),
                expected: batch.fingerprint.clone(),
                actual,
            });
        }

        with_retry(&self.storage, "import batch commit", || {
            let tmp = self.imports.stage(batch)?;
            self.commit_audited(
                &tmp,
                || self.imports.commit(&tmp, &batch.source_id, batch.index),
                AuditDraft {
                    event_type: event_types::IMPORT_BATCH,
                    subject: &subject,
                    actor,
                    new_hash: &batch.fingerprint,
                    metadata: json!({
                        "source_id": batch.source_id,
                        "index": batch.index,
                        "messages": batch.messages.len(),
                    }),
                },
            )
        })
    }

    /// Sorted indexes of the committed batches for `source_id`.
    pub fn import_batches(&self, source_id: &str) -> Result<Vec<u64>> {
        self.imports.indexes(source_id)
    }

    pub fn load_import_batch(&self, source_id: &str, index: u64) -> Result<ImportBatch> {
        self.imports.load(source_id, index)
    }

    /// Total messages across all committed batches of `source_id`.
    pub fn imported_message_count(&self, source_id: &str) -> Result<u64> {
        let mut total = 0u64;
        for index in self.imports.indexes(source_id)? {
            total += self.imports.load(source_id, index)?.messages.len() as u64;
        }
        Ok(total)
    }

    // ── Commit protocol ───────────────────────────────────────────────────────

    fn commit_audited(
        &self,
        tmp: &Path,
        commit: impl FnOnce() -> Result<()>,
        draft: AuditDraft<'_>,
    ) -> Result<EventId> {
        let prior = match self.audit.subject_tip(draft.subject) {
            Ok(tip) => tip,
            Err(e) => {
                fsutil::discard_staged(tmp);
                return Err(e.into_persistence());
            }
        };

        let record = AuditRecord::new(
            draft.event_type,
            draft.subject,
            draft.actor,
            prior.clone(),
            draft.new_hash,
        )
        .metadata(draft.metadata);
        let event_id = match self.audit.append(record) {
            Ok(id) => id,
            Err(e) => {
                fsutil::discard_staged(tmp);
                return Err(ContinuityError::Persistence(format!(
                    "audit append for {} failed: {e}",
                    draft.subject
                )));
            }
        };

        if let Err(e) = commit() {
            fsutil::discard_staged(tmp);
            let rollback = AuditRecord::new(
                rollback_event(draft.event_type),
                draft.subject,
                draft.actor,
                draft.new_hash,
                prior,
            )
            .outcome(AuditOutcome::RolledBack)
            .metadata(json!({ "rolled_back": event_id.0, "error": e.to_string() }));
            if let Err(re) = self.audit.append(rollback) {
                log::error!("failed to record rollback for {}: {re}", draft.subject);
            }
            return Err(e.into_persistence());
        }
        Ok(event_id)
    }
}

fn rollback_event(event_type: &str) -> String {
    if event_type == event_types::SNAPSHOT_CREATE {
        event_types::SNAPSHOT_CREATE_ROLLBACK.to_string()
    } else {
        format!("{event_type}.rollback")
    }
}

struct AuditDraft<'a> {
    event_type: &'a str,
    subject: &'a str,
    actor: &'a str,
    new_hash: &'a str,
    metadata: serde_json::Value,
}
