//! Data structures for the resurrection state machine.

use serde::{Deserialize, Serialize};

use crate::audit::EventId;
use crate::canonical;
use crate::crypto::SignerId;
use crate::error::{ContinuityError, Result};
use crate::snapshot::SnapshotId;

/// States of one resurrection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResurrectionState {
    Loaded,
    HashVerified,
    SignatureVerified,
    TriggerChecked,
    Executed,
    Logged,
    Failed,
}

impl ResurrectionState {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Loaded => "LOADED",
            Self::HashVerified => "HASH_VERIFIED",
            Self::SignatureVerified => "SIGNATURE_VERIFIED",
            Self::TriggerChecked => "TRIGGER_CHECKED",
            Self::Executed => "EXECUTED",
            Self::Logged => "LOGGED",
            Self::Failed => "FAILED",
        }
    }

    /// Next state on the success path.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Loaded => Some(Self::HashVerified),
            Self::HashVerified => Some(Self::SignatureVerified),
            Self::SignatureVerified => Some(Self::TriggerChecked),
            Self::TriggerChecked => Some(Self::Executed),
            Self::Executed => Some(Self::Logged),
            Self::Logged | Self::Failed => None,
        }
    }
}

/// Unique identifier for a resurrection receipt (`arcpt_...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptId(pub String);

impl std::fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a successful recovery routine produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResurrectionReceipt {
    pub id: ReceiptId,
    pub snapshot_id: SnapshotId,
    pub snapshot_fingerprint: String,
    pub steward: String,
    pub covenant_instruction: String,
    pub emitted: Vec<String>,
    pub returned: Option<String>,
    pub steps: u64,
    pub executed_at: u64,
    /// SHA-256 of the canonical receipt minus this field.
    pub receipt_hash: String,
}

impl ResurrectionReceipt {
    pub fn compute_hash(&self) -> Result<String> {
        canonical::fingerprint_excluding(self, "", &["receipt_hash"])
    }
}

/// Caller input to [`resurrect`](super::ResurrectionEngine::resurrect).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResurrectionRequest {
    /// Snapshot id, path, or `instance_name@latest`.
    pub snapshot_ref: String,
    pub trigger_phrase: Option<String>,
    pub steward_id: String,
    /// Overrides the configured expected signer.
    #[serde(default)]
    pub expected_signer: Option<SignerId>,
}

impl ResurrectionRequest {
    pub fn new(snapshot_ref: impl Into<String>, steward_id: impl Into<String>) -> Self {
        Self {
            snapshot_ref: snapshot_ref.into(),
            trigger_phrase: None,
            steward_id: steward_id.into(),
            expected_signer: None,
        }
    }

    pub fn with_trigger_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.trigger_phrase = Some(phrase.into());
        self
    }

    pub fn with_expected_signer(mut self, signer: SignerId) -> Self {
        self.expected_signer = Some(signer);
        self
    }
}

/// Structured failure carried in an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResurrectionFailure {
    /// Stable error tag, see [`ContinuityError::kind`].
    pub kind: String,
    pub message: String,
    /// Last state reached before failing.
    pub state: ResurrectionState,
}

impl ResurrectionFailure {
    pub fn from_error(err: &ContinuityError, state: ResurrectionState) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            state,
        }
    }
}

/// Result of one resurrection attempt. Always produced, never an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResurrectionOutcome {
    pub success: bool,
    pub snapshot_id: Option<SnapshotId>,
    pub receipt: Option<ResurrectionReceipt>,
    pub error: Option<ResurrectionFailure>,
    pub logged_event_id: Option<EventId>,
    /// Every state entered, in order.
    pub transitions: Vec<ResurrectionState>,
}
