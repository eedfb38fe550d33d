//! Data structures for instance lineage and drift.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::snapshot::SnapshotId;

/// Unique identifier for a spawned instance.
///
/// Format: `ainst_` + base58 of 16 bytes of SHA-256 over the anchor key,
/// spawn time, and a salted hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    /// Drift index above the reconciliation threshold.
    Diverged,
}

/// One registered instance under an anchor key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub instance_id: InstanceId,
    pub spawned_at: u64,
    pub parent_instance: Option<InstanceId>,
    pub is_root: bool,
    pub drift_index: u8,
    pub status: InstanceStatus,
    /// Snapshot created for the instance by `spawn_from`, if any.
    #[serde(default)]
    pub snapshot_id: Option<SnapshotId>,
    /// Most recent raw drift score.
    #[serde(default)]
    pub last_drift: Option<f64>,
}

/// The registry document: anchor key → instances in spawn order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorRegistry {
    pub anchors: BTreeMap<String, Vec<InstanceEntry>>,
}

impl AnchorRegistry {
    pub fn instances(&self, anchor_key: &str) -> &[InstanceEntry] {
        self.anchors
            .get(anchor_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn root(&self, anchor_key: &str) -> Option<&InstanceEntry> {
        self.instances(anchor_key).iter().find(|e| e.is_root)
    }
}

/// Breakdown of a drift computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Weighted total in [0,1].
    pub score: f64,
    pub trait_drift: f64,
    pub memory_drift: f64,
    pub personality_drift: f64,
    /// Terms that were missing or malformed and contributed 0.
    pub warnings: Vec<String>,
}

impl DriftReport {
    /// Score mapped onto the 0–10 drift index scale.
    pub fn drift_index(&self) -> u8 {
        (self.score * 10.0).round().clamp(0.0, 10.0) as u8
    }
}

/// Instance singled out by a reconciliation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedInstance {
    pub instance_id: InstanceId,
    pub drift_index: u8,
}

/// Report-only result of [`reconciliation_check`](super::LineageEngine::reconciliation_check).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub anchor_key: String,
    pub needs_reconciliation: bool,
    pub flagged_instances: Vec<FlaggedInstance>,
    pub threshold: u8,
}

/// Result of `spawn_from`: the registered instance and its snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnedInstance {
    pub instance_id: InstanceId,
    pub snapshot_id: SnapshotId,
}
