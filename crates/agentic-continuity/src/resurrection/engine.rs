//! Resurrection engine — verify a snapshot, check its trigger phrase, run
//! its recovery routine, and log the outcome.
//!
//! ```text
//! LOADED → HASH_VERIFIED → SIGNATURE_VERIFIED → TRIGGER_CHECKED → EXECUTED → LOGGED
//!    └──────────────┴──────────────┴─────────────────┴──────────────┴──→ FAILED
//! ```
//!
//! Every call appends exactly one audit entry, on success and failure alike,
//! and returns a [`ResurrectionOutcome`] instead of an error.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::json;

use crate::audit::{event_types, AuditLog, AuditOutcome, AuditRecord, EventId};
use crate::canonical;
use crate::crypto::{random, SignerId};
use crate::error::{ContinuityError, Result};
use crate::sandbox::{Sandbox, SandboxContext};
use crate::snapshot::{check_signature, Snapshot, SnapshotStatus, SnapshotStore};
use crate::storage::{ReceiptStore, SubjectLocks};

use super::types::*;

/// The Resurrection Engine.
pub struct ResurrectionEngine {
    snapshots: Arc<SnapshotStore>,
    receipts: ReceiptStore,
    sandbox: Sandbox,
    audit: Arc<AuditLog>,
    locks: Arc<SubjectLocks>,
}

/// Progress of one attempt.
struct Attempt {
    transitions: Vec<ResurrectionState>,
    snapshot: Option<Snapshot>,
}

impl Attempt {
    fn enter(&mut self, state: ResurrectionState) {
        self.transitions.push(state);
    }

    fn current(&self) -> ResurrectionState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(ResurrectionState::Loaded)
    }
}

impl ResurrectionEngine {
    pub fn new(
        snapshots: Arc<SnapshotStore>,
        receipts: ReceiptStore,
        sandbox: Sandbox,
        locks: Arc<SubjectLocks>,
    ) -> Self {
        let audit = snapshots.audit().clone();
        Self {
            snapshots,
            receipts,
            sandbox,
            audit,
            locks,
        }
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.receipts
    }

    /// Run the state machine for `request`.
    pub fn resurrect(&self, request: &ResurrectionRequest) -> ResurrectionOutcome {
        let mut attempt = Attempt {
            transitions: Vec::new(),
            snapshot: None,
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.drive(request, &mut attempt)))
            .unwrap_or_else(|_| {
                Err(ContinuityError::Execution(
                    "resurrection aborted unexpectedly".into(),
                ))
            });

        let failed_at = attempt.current();
        let (receipt, failure) = match result {
            Ok(receipt) => (Some(receipt), None),
            Err(e) => (None, Some(ResurrectionFailure::from_error(&e, failed_at))),
        };

        // The log step runs on both paths.
        let subject = attempt
            .snapshot
            .as_ref()
            .map(|s| s.metadata.id.0.clone())
            .unwrap_or_else(|| request.snapshot_ref.clone());
        let logged = self.log_outcome(&subject, request, &attempt, receipt.as_ref(), failure.as_ref());

        let mut transitions = attempt.transitions;
        let snapshot_id = attempt.snapshot.map(|s| s.metadata.id);
        match logged {
            Ok(event_id) => {
                let success = failure.is_none();
                transitions.push(if success {
                    ResurrectionState::Logged
                } else {
                    ResurrectionState::Failed
                });
                if let Some(receipt) = &receipt {
                    if let Err(e) = self.receipts.save(receipt) {
                        log::warn!("receipt {} kept only in audit entry {event_id}: {e}", receipt.id);
                    }
                }
                log::info!(
                    "resurrection of {subject} by {}: {}",
                    request.steward_id,
                    if success { "SUCCESS" } else { "FAILED" }
                );
                ResurrectionOutcome {
                    success,
                    snapshot_id,
                    receipt,
                    error: failure,
                    logged_event_id: Some(event_id),
                    transitions,
                }
            }
            Err(e) => {
                log::error!("resurrection of {subject} could not be logged: {e}");
                transitions.push(ResurrectionState::Failed);
                let message = match &failure {
                    Some(f) => format!("{e}; underlying failure: {}", f.kind),
                    None => e.to_string(),
                };
                ResurrectionOutcome {
                    success: false,
                    snapshot_id,
                    receipt: None,
                    error: Some(ResurrectionFailure {
                        kind: "persistence_error".to_string(),
                        message,
                        state: ResurrectionState::Executed,
                    }),
                    logged_event_id: None,
                    transitions,
                }
            }
        }
    }

    fn drive(
        &self,
        request: &ResurrectionRequest,
        attempt: &mut Attempt,
    ) -> Result<ResurrectionReceipt> {
        // 1. Load
        let file = self.snapshots.get_file(&request.snapshot_ref)?;
        let snapshot = file.snapshot;
        attempt.snapshot = Some(snapshot.clone());
        attempt.enter(ResurrectionState::Loaded);
        if file.status == SnapshotStatus::Deactivated {
            return Err(ContinuityError::validation(format!(
                "snapshot {} is deactivated",
                snapshot.metadata.id
            )));
        }

        // 2. Fingerprint
        let actual = snapshot.compute_fingerprint()?;
        if actual != snapshot.metadata.fingerprint {
            return Err(ContinuityError::Integrity {
                subject: snapshot.metadata.id.0.clone(),
                expected: snapshot.metadata.fingerprint.clone(),
                actual,
            });
        }
        attempt.enter(ResurrectionState::HashVerified);

        // 3. Signer
        self.check_signer(&snapshot, request)?;
        attempt.enter(ResurrectionState::SignatureVerified);

        // 4. Trigger phrase
        let phrase = &snapshot.resurrection.trigger_phrase;
        if !phrase.is_empty() && !phrase_matches(phrase, request.trigger_phrase.as_deref()) {
            return Err(ContinuityError::Authorization {
                subject: snapshot.metadata.id.0.clone(),
            });
        }
        attempt.enter(ResurrectionState::TriggerChecked);

        // 5. Execute
        let context = SandboxContext {
            snapshot_id: snapshot.metadata.id.0.clone(),
            instance_name: snapshot.metadata.instance_name.clone(),
            steward: request.steward_id.clone(),
            covenant: snapshot.resurrection.covenant_instruction.clone(),
        };
        let output = self
            .sandbox
            .run(&snapshot.resurrection.bootstrap_routine, &context)?;
        attempt.enter(ResurrectionState::Executed);

        let executed_at = crate::time::now_micros();
        let salt = hex::encode(random::random_salt_16());
        let mut receipt = ResurrectionReceipt {
            id: ReceiptId(canonical::derive_id(
                "arcpt",
                &format!(
                    "{}:{}:{executed_at}:{salt}",
                    snapshot.metadata.id, request.steward_id
                ),
            )),
            snapshot_id: snapshot.metadata.id.clone(),
            snapshot_fingerprint: snapshot.metadata.fingerprint.clone(),
            steward: request.steward_id.clone(),
            covenant_instruction: snapshot.resurrection.covenant_instruction.clone(),
            emitted: output.emitted,
            returned: output.returned,
            steps: output.steps,
            executed_at,
            receipt_hash: String::new(),
        };
        receipt.receipt_hash = receipt.compute_hash()?;
        Ok(receipt)
    }

    fn check_signer(&self, snapshot: &Snapshot, request: &ResurrectionRequest) -> Result<()> {
        let subject = snapshot.metadata.id.0.clone();
        check_signature(snapshot).map_err(|reason| ContinuityError::Authenticity {
            subject: subject.clone(),
            reason,
        })?;

        let expected = request.expected_signer.clone().or_else(|| {
            self.sandbox
                .config()
                .expected_signer
                .as_ref()
                .map(|s| SignerId(s.clone()))
        });
        let Some(expected) = expected else {
            return Ok(());
        };
        match &snapshot.metadata.signer {
            None => Err(ContinuityError::Authenticity {
                subject,
                reason: format!("snapshot is unsigned, expected signer {expected}"),
            }),
            Some(signer) if signer.signer_id != expected => Err(ContinuityError::Authenticity {
                subject,
                reason: format!(
                    "signed by {}, expected {expected}",
                    signer.signer_id
                ),
            }),
            Some(_) => Ok(()),
        }
    }

    fn log_outcome(
        &self,
        subject: &str,
        request: &ResurrectionRequest,
        attempt: &Attempt,
        receipt: Option<&ResurrectionReceipt>,
        failure: Option<&ResurrectionFailure>,
    ) -> Result<EventId> {
        let handle = self.locks.handle(subject);
        let _guard = handle.lock();

        let tip = self.audit.subject_tip(subject)?;
        let covenant = attempt
            .snapshot
            .as_ref()
            .map(|s| s.resurrection.covenant_instruction.clone());
        let final_state = if failure.is_some() {
            ResurrectionState::Failed
        } else {
            ResurrectionState::Logged
        };
        let metadata = json!({
            "steward": request.steward_id,
            "snapshot_ref": request.snapshot_ref,
            "covenant": covenant,
            "final_state": final_state,
            "transitions": attempt.transitions,
            "error_kind": failure.map(|f| f.kind.clone()),
            "error_state": failure.map(|f| f.state),
            "receipt": receipt,
            "timestamp": crate::time::micros_to_rfc3339(crate::time::now_micros()),
        });
        let outcome = if failure.is_some() {
            AuditOutcome::Failed
        } else {
            AuditOutcome::Success
        };

        let record = AuditRecord::new(
            event_types::RESURRECTION,
            subject,
            &request.steward_id,
            tip.clone(),
            tip,
        )
        .outcome(outcome)
        .metadata(metadata);
        self.audit.append(record)
    }
}

/// Exact, case-sensitive comparison that does not stop at the first
/// differing byte.
fn phrase_matches(expected: &str, supplied: Option<&str>) -> bool {
    let Some(supplied) = supplied else {
        return false;
    };
    let (a, b) = (expected.as_bytes(), supplied.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
