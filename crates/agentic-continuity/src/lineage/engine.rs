//! Lineage engine — instance spawning, drift recording, reconciliation checks.

use std::cell::RefCell;
use std::sync::Arc;

use serde_json::json;

use crate::audit::{event_types, AuditLog, AuditOutcome, AuditRecord, EventId};
use crate::canonical;
use crate::config::{LineageConfig, StorageConfig};
use crate::crypto::random;
use crate::error::{ContinuityError, Result};
use crate::snapshot::{Snapshot, SnapshotDraft, SnapshotId, SnapshotStore};
use crate::storage::fsutil::with_retry;
use crate::storage::{RegistryStore, SubjectLocks};

use super::drift::drift_score;
use super::types::*;

/// Audit subject used for one anchor key.
pub fn anchor_subject(anchor_key: &str) -> String {
    format!("anchor:{anchor_key}")
}

/// Derive an instance id from the anchor key, spawn time, and a fresh salt.
pub fn derive_instance_id(anchor_key: &str, spawned_at: u64) -> InstanceId {
    let salt = hex::encode(random::random_salt_16());
    let salted = canonical::sha256_hex(format!("{anchor_key}:{spawned_at}:{salt}").as_bytes());
    InstanceId(canonical::derive_id(
        "ainst",
        &format!("{anchor_key}:{spawned_at}:{salted}"),
    ))
}

/// The Lineage & Drift Engine.
pub struct LineageEngine {
    registry: RegistryStore,
    snapshots: Arc<SnapshotStore>,
    audit: Arc<AuditLog>,
    locks: Arc<SubjectLocks>,
    config: LineageConfig,
    storage: StorageConfig,
}

impl LineageEngine {
    pub fn new(
        registry: RegistryStore,
        snapshots: Arc<SnapshotStore>,
        locks: Arc<SubjectLocks>,
        config: LineageConfig,
        storage: StorageConfig,
    ) -> Self {
        let audit = snapshots.audit().clone();
        Self {
            registry,
            snapshots,
            audit,
            locks,
            config,
            storage,
        }
    }

    pub fn config(&self) -> &LineageConfig {
        &self.config
    }

    // ── Spawning ──────────────────────────────────────────────────────────────

    /// Register a new instance under `anchor_key`.
    ///
    /// The first instance of a key becomes its root; later instances record
    /// the root as their parent.
    pub fn spawn_instance(&self, anchor_key: &str, actor: &str) -> Result<InstanceId> {
        check_anchor_key(anchor_key)?;
        let spawned_at = crate::time::now_micros();
        let instance_id = derive_instance_id(anchor_key, spawned_at);
        let entry = self.register(anchor_key, actor, instance_id, spawned_at, |_| Ok(None))?;
        Ok(entry.instance_id)
    }

    /// Spawn an instance whose initial state is a copy of `source`.
    ///
    /// A new snapshot is stored with the anchor key and parent instance set,
    /// and linked from the registry entry. The parent is read while the
    /// registry is locked; if registration fails the copy is deactivated.
    pub fn spawn_from(
        &self,
        anchor_key: &str,
        source: &str,
        actor: &str,
    ) -> Result<SpawnedInstance> {
        check_anchor_key(anchor_key)?;
        let source = self.snapshots.get(source)?;

        let spawned_at = crate::time::now_micros();
        let instance_id = derive_instance_id(anchor_key, spawned_at);

        // Reused across registry retries as long as the parent is unchanged.
        let created: RefCell<Option<(Option<InstanceId>, SnapshotId)>> = RefCell::new(None);
        let result = self.register(anchor_key, actor, instance_id.clone(), spawned_at, |parent| {
            let cached = created.borrow_mut().take();
            if let Some((cached_parent, id)) = cached {
                if cached_parent.as_ref() == parent {
                    *created.borrow_mut() = Some((cached_parent, id.clone()));
                    return Ok(Some(id));
                }
                self.discard_orphan(&id, actor);
            }

            let mut draft = SnapshotDraft::from_snapshot(&source)
                .with_anchor(anchor_key)
                .with_drift_index(0)
                .with_tag(format!("instance:{instance_id}"));
            draft.parent_instance = parent.map(|p| p.0.clone());
            let id = self.snapshots.create(draft, actor, None)?;
            *created.borrow_mut() = Some((parent.cloned(), id.clone()));
            Ok(Some(id))
        });

        match result {
            Ok(entry) => {
                let snapshot_id = entry.snapshot_id.ok_or_else(|| {
                    ContinuityError::Persistence(format!(
                        "instance {} registered without its snapshot",
                        entry.instance_id
                    ))
                })?;
                Ok(SpawnedInstance {
                    instance_id: entry.instance_id,
                    snapshot_id,
                })
            }
            Err(e) => {
                if let Some((_, id)) = created.into_inner() {
                    self.discard_orphan(&id, actor);
                }
                Err(e)
            }
        }
    }

    /// Deactivate a spawn copy that never made it into the registry.
    fn discard_orphan(&self, id: &SnapshotId, actor: &str) {
        match self.snapshots.deactivate(id, actor, "spawn not registered") {
            Ok(_) => log::warn!("deactivated unregistered spawn snapshot {id}"),
            Err(e) => log::error!("could not deactivate unregistered spawn snapshot {id}: {e}"),
        }
    }

    /// Append an instance entry under the anchor's registry lock.
    ///
    /// `snapshot` receives the anchor's root (the new entry's parent) as read
    /// under that lock and returns the snapshot to link, if any.
    fn register(
        &self,
        anchor_key: &str,
        actor: &str,
        instance_id: InstanceId,
        spawned_at: u64,
        snapshot: impl Fn(Option<&InstanceId>) -> Result<Option<SnapshotId>>,
    ) -> Result<InstanceEntry> {
        let subject = anchor_subject(anchor_key);
        let handle = self.locks.handle(&subject);
        let _guard = handle.lock();

        let entry = self.audited_update(anchor_key, event_types::LINEAGE_SPAWN, actor, |reg| {
            let entries = reg.anchors.entry(anchor_key.to_string()).or_default();
            let root = entries
                .iter()
                .find(|e| e.is_root)
                .map(|e| e.instance_id.clone());
            let snapshot_id = snapshot(root.as_ref())?;
            let entry = InstanceEntry {
                instance_id: instance_id.clone(),
                spawned_at,
                is_root: root.is_none(),
                parent_instance: root,
                drift_index: 0,
                status: InstanceStatus::Active,
                snapshot_id,
                last_drift: None,
            };
            entries.push(entry.clone());
            let metadata = json!({
                "anchor_key": anchor_key,
                "instance_id": entry.instance_id.0,
                "is_root": entry.is_root,
                "parent_instance": entry.parent_instance.as_ref().map(|p| p.0.clone()),
                "snapshot_id": entry.snapshot_id.as_ref().map(|s| s.0.clone()),
            });
            Ok((entry, metadata))
        })?;

        log::info!(
            "spawned {} under '{anchor_key}'{}",
            entry.instance_id,
            if entry.is_root { " (root)" } else { "" }
        );
        Ok(entry)
    }

    // ── Drift ─────────────────────────────────────────────────────────────────

    /// Drift between two snapshots, each given as a snapshot locator or an
    /// instance id spawned with [`spawn_from`](Self::spawn_from).
    pub fn compute_drift(&self, parent: &str, child: &str) -> Result<DriftReport> {
        let parent = self.resolve(parent)?;
        let child = self.resolve(child)?;
        Ok(drift_score(&parent, &child))
    }

    /// Compute drift and store it on `instance_id`'s registry entry.
    pub fn record_drift(
        &self,
        anchor_key: &str,
        instance_id: &InstanceId,
        parent: &str,
        child: &str,
        actor: &str,
    ) -> Result<DriftReport> {
        let report = self.compute_drift(parent, child)?;
        let drift_index = report.drift_index();
        let status = if drift_index > self.config.drift_threshold {
            InstanceStatus::Diverged
        } else {
            InstanceStatus::Active
        };

        let subject = anchor_subject(anchor_key);
        let handle = self.locks.handle(&subject);
        let _guard = handle.lock();

        self.audited_update(anchor_key, event_types::LINEAGE_DRIFT, actor, |reg| {
            let entry = reg
                .anchors
                .get_mut(anchor_key)
                .and_then(|entries| entries.iter_mut().find(|e| &e.instance_id == instance_id))
                .ok_or_else(|| {
                    ContinuityError::NotFound(format!(
                        "instance {instance_id} not registered under '{anchor_key}'"
                    ))
                })?;
            entry.drift_index = drift_index;
            entry.last_drift = Some(report.score);
            entry.status = status;
            let metadata = json!({
                "instance_id": instance_id.0,
                "score": report.score,
                "drift_index": drift_index,
                "status": status,
                "warnings": report.warnings.len(),
            });
            Ok(((), metadata))
        })?;

        if status == InstanceStatus::Diverged {
            log::warn!(
                "instance {instance_id} under '{anchor_key}' diverged (drift index {drift_index})"
            );
        }
        Ok(report)
    }

    /// Flag instances whose drift index exceeds the configured threshold.
    /// Nothing is merged or modified.
    pub fn reconciliation_check(&self, anchor_key: &str) -> Result<ReconciliationReport> {
        let registry = self.registry.load()?;
        let entries = registry
            .anchors
            .get(anchor_key)
            .ok_or_else(|| ContinuityError::NotFound(format!("anchor not found: {anchor_key}")))?;

        let threshold = self.config.drift_threshold;
        let flagged_instances: Vec<FlaggedInstance> = entries
            .iter()
            .filter(|e| e.drift_index > threshold)
            .map(|e| FlaggedInstance {
                instance_id: e.instance_id.clone(),
                drift_index: e.drift_index,
            })
            .collect();

        Ok(ReconciliationReport {
            anchor_key: anchor_key.to_string(),
            needs_reconciliation: !flagged_instances.is_empty(),
            flagged_instances,
            threshold,
        })
    }

    /// Registered instances of `anchor_key` in spawn order.
    pub fn instances(&self, anchor_key: &str) -> Result<Vec<InstanceEntry>> {
        Ok(self.registry.load()?.instances(anchor_key).to_vec())
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// Missing snapshots are a `Comparison` failure here, not `NotFound`.
    fn resolve(&self, locator: &str) -> Result<Snapshot> {
        let locator = if locator.starts_with("ainst_") {
            let registry = self.registry.load()?;
            let snapshot_id = registry
                .anchors
                .values()
                .flatten()
                .find(|e| e.instance_id.0 == locator)
                .and_then(|e| e.snapshot_id.clone())
                .ok_or_else(|| {
                    ContinuityError::Comparison(format!("instance {locator} has no snapshot"))
                })?;
            snapshot_id.0
        } else {
            locator.to_string()
        };

        self.snapshots.get(&locator).map_err(|e| match e {
            ContinuityError::NotFound(msg) => ContinuityError::Comparison(msg),
            other => other,
        })
    }

    /// Locked registry read-modify-write with its audit entry.
    ///
    /// The entry is appended before the registry is written; if the write
    /// then fails a compensating entry restores the previous state hash.
    fn audited_update<T>(
        &self,
        anchor_key: &str,
        event_type: &str,
        actor: &str,
        mutate: impl Fn(&mut AnchorRegistry) -> Result<(T, serde_json::Value)>,
    ) -> Result<T> {
        let subject = anchor_subject(anchor_key);
        let subject = subject.as_str();
        with_retry(&self.storage, event_type, || {
            let mut appended: Option<(String, String, EventId)> = None;
            let result = self.registry.update(|reg| {
                let (value, metadata) = mutate(reg)?;
                let new_hash =
                    canonical::fingerprint_excluding(&reg.instances(anchor_key), "", &[])?;
                let prior = self.audit.subject_tip(subject)?;
                let record =
                    AuditRecord::new(event_type, subject, actor, prior.clone(), new_hash.clone())
                        .metadata(metadata);
                let event_id = self.audit.append(record).map_err(|e| {
                    ContinuityError::Persistence(format!("audit append for {subject} failed: {e}"))
                })?;
                appended = Some((prior, new_hash, event_id));
                Ok(value)
            });

            if let (Err(e), Some((prior, new_hash, event_id))) = (&result, appended) {
                let rollback = AuditRecord::new(
                    format!("{event_type}.rollback"),
                    subject,
                    actor,
                    new_hash,
                    prior,
                )
                .outcome(AuditOutcome::RolledBack)
                .metadata(json!({ "rolled_back": event_id.0, "error": e.to_string() }));
                if let Err(re) = self.audit.append(rollback) {
                    log::error!("failed to record rollback for {subject}: {re}");
                }
            }
            result
        })
    }
}

fn check_anchor_key(anchor_key: &str) -> Result<()> {
    if anchor_key.trim().is_empty() {
        return Err(ContinuityError::validation("anchor key must not be empty"));
    }
    Ok(())
}
