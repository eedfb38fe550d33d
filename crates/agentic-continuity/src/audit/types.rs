//! Data structures for the append-only audit log.

use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::error::Result;

/// Stable event type tags written by the components.
pub mod event_types {
    pub const SNAPSHOT_CREATE: &str = "snapshot.create";
    pub const SNAPSHOT_DEACTIVATE: &str = "snapshot.deactivate";
    pub const SNAPSHOT_CREATE_ROLLBACK: &str = "snapshot.create.rollback";
    pub const LINEAGE_SPAWN: &str = "lineage.spawn";
    pub const LINEAGE_DRIFT: &str = "lineage.drift";
    pub const RESURRECTION: &str = "resurrection";
    pub const IMPORT_BATCH: &str = "import.batch";
}

/// Unique identifier for an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result recorded for an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Failed,
    /// Compensating entry for a state change that could not be committed.
    RolledBack,
}

impl AuditOutcome {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

/// What a caller hands to [`AuditLog::append`](super::AuditLog::append).
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event_type: String,
    pub subject_id: String,
    pub actor_id: String,
    pub prior_state_hash: String,
    pub new_state_hash: String,
    pub outcome: AuditOutcome,
    pub metadata: serde_json::Value,
}

impl AuditRecord {
    /// Record a transition of `subject_id` from `prior` to `new`.
    pub fn new(
        event_type: impl Into<String>,
        subject_id: impl Into<String>,
        actor_id: impl Into<String>,
        prior_state_hash: impl Into<String>,
        new_state_hash: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            subject_id: subject_id.into(),
            actor_id: actor_id.into(),
            prior_state_hash: prior_state_hash.into(),
            new_state_hash: new_state_hash.into(),
            outcome: AuditOutcome::Success,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: EventId,
    /// Position in the global log, starting at 0.
    pub sequence: u64,
    pub timestamp: u64,
    pub event_type: String,
    pub subject_id: String,
    pub actor_id: String,
    pub prior_state_hash: String,
    pub new_state_hash: String,
    pub outcome: AuditOutcome,
    pub metadata: serde_json::Value,
    /// `entry_hash` of the preceding line (genesis hash for the first).
    pub previous_entry_hash: String,
    /// SHA-256 of the canonical entry without this field.
    pub entry_hash: String,
}

impl AuditEntry {
    /// Recompute the hash this entry should carry.
    pub fn compute_hash(&self) -> Result<String> {
        canonical::fingerprint_excluding(self, "", &["entry_hash"])
    }
}

/// A detected break in the hash chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Line position across all segments (0-based).
    pub position: u64,
    pub event_id: Option<EventId>,
    pub subject_id: Option<String>,
    pub reason: String,
}

/// Result of replaying the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub ok: bool,
    pub entries_checked: u64,
    pub breaks: Vec<ChainBreak>,
}

/// Result of relocating old entries into cold storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveReport {
    pub segment: Option<std::path::PathBuf>,
    pub relocated: u64,
    pub remaining: u64,
}
