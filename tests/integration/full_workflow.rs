//! Integration test: full end-to-end workflow.
//!
//! Tests the complete lifecycle:
//! 1. Create a signed snapshot and a new version
//! 2. Spawn instances from it and measure drift
//! 3. Record a diverged instance and check reconciliation
//! 4. Resurrect through the trigger-phrase gate
//! 5. Deactivate and verify the audit chain

use agentic_continuity::audit::AuditOutcome;
use agentic_continuity::canonical::is_hex_digest;
use agentic_continuity::snapshot::{validate_snapshot, SnapshotFilter};
use agentic_continuity::{
    Continuity, ContinuityConfig, ContinuityError, MemoryCategory, ResurrectionRequest,
    SignerAnchor, SnapshotDraft, SnapshotStatus,
};

fn base_draft() -> SnapshotDraft {
    SnapshotDraft::new("sage", "INFJ")
        .with_trait("creativity", 0.9)
        .with_trait("empathy", 0.85)
        .with_memory(MemoryCategory::LongTerm, ["m1", "m2"])
        .with_covenant("guard the archive")
        .with_trigger_phrase("enforce-x")
        .with_bootstrap("set greeting \"hello {steward}\"\nemit \"{greeting}\"\nreturn \"awake\"")
}

#[test]
fn full_workflow_snapshot_to_audit() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Continuity::open(dir.path(), ContinuityConfig::default()).unwrap();
    let signer = SignerAnchor::generate(Some("steward-key".into()));

    // ── Step 1: Create a snapshot ───────────────────────────────────────
    let v1 = engine
        .snapshots()
        .create(base_draft(), "alice", Some(&signer))
        .expect("snapshot should be created");
    let snap = engine.snapshots().get(v1.as_str()).unwrap();
    assert!(is_hex_digest(&snap.metadata.fingerprint));
    assert_eq!(snap.continuity.drift_index, 0);
    assert!(validate_snapshot(&snap).ok);

    let v2 = engine
        .snapshots()
        .create_version(
            &v1,
            SnapshotDraft::from_snapshot(&snap)
                .with_memory(MemoryCategory::Episodic, ["met the steward"]),
            "alice",
            Some(&signer),
        )
        .unwrap();
    let latest = engine.snapshots().get("sage@latest").unwrap();
    assert_eq!(latest.metadata.id, v2);
    assert_eq!(latest.metadata.version, 2);
    assert_eq!(latest.metadata.previous_version.as_ref(), Some(&v1));

    // ── Step 2: Spawn instances with identical state ────────────────────
    let first = engine
        .lineage()
        .spawn_from("anchor-x", v1.as_str(), "alice")
        .unwrap();
    let second = engine
        .lineage()
        .spawn_from("anchor-x", v1.as_str(), "alice")
        .unwrap();
    let drift = engine
        .lineage()
        .compute_drift(first.instance_id.as_str(), second.instance_id.as_str())
        .unwrap();
    assert_eq!(drift.score, 0.0);

    let instances = engine.lineage().instances("anchor-x").unwrap();
    assert_eq!(instances.len(), 2);
    assert!(instances[0].is_root);
    assert!(!instances[1].is_root);

    // ── Step 3: Diverge one instance and check reconciliation ───────────
    let diverged = engine
        .snapshots()
        .create(
            SnapshotDraft::new("sage-fork", "ESTP")
                .with_trait("creativity", 0.1)
                .with_trait("empathy", 0.05)
                .with_memory(MemoryCategory::ShortTerm, ["entirely unrelated content"]),
            "bob",
            None,
        )
        .unwrap();
    let report = engine
        .lineage()
        .record_drift(
            "anchor-x",
            &second.instance_id,
            v1.as_str(),
            diverged.as_str(),
            "bob",
        )
        .unwrap();
    assert!(report.drift_index() > engine.config().lineage.drift_threshold);

    let reconciliation = engine.lineage().reconciliation_check("anchor-x").unwrap();
    assert!(reconciliation.needs_reconciliation);
    assert_eq!(reconciliation.flagged_instances.len(), 1);
    assert_eq!(
        reconciliation.flagged_instances[0].instance_id,
        second.instance_id
    );

    // ── Step 4: Resurrect through the gate ──────────────────────────────
    let before = engine.audit().entries(None).unwrap().len();
    let refused = engine.resurrection().resurrect(
        &ResurrectionRequest::new(v2.as_str(), "operator").with_trigger_phrase("enforce-y"),
    );
    assert!(!refused.success);
    assert_eq!(refused.error.as_ref().unwrap().kind, "authorization_error");

    let accepted = engine.resurrection().resurrect(
        &ResurrectionRequest::new("sage@latest", "operator")
            .with_trigger_phrase("enforce-x")
            .with_expected_signer(signer.id()),
    );
    assert!(accepted.success, "{:?}", accepted.error);
    let receipt = accepted.receipt.as_ref().unwrap();
    assert_eq!(receipt.emitted, vec!["hello operator"]);
    assert_eq!(receipt.returned.as_deref(), Some("awake"));
    assert_eq!(receipt.snapshot_id, v2);

    let entries = engine.audit().entries(None).unwrap();
    assert_eq!(entries.len(), before + 2);
    assert_eq!(entries[before].outcome, AuditOutcome::Failed);
    assert_eq!(entries[before + 1].outcome, AuditOutcome::Success);
    assert_eq!(
        engine.resurrection().receipts().load(&receipt.id).unwrap(),
        *receipt
    );

    // ── Step 5: Deactivate and verify the chain ─────────────────────────
    engine
        .snapshots()
        .deactivate(&v1, "alice", "superseded")
        .unwrap();
    assert_eq!(
        engine.snapshots().status(&v1).unwrap(),
        SnapshotStatus::Deactivated
    );
    let active: Vec<_> = engine
        .snapshots()
        .list(SnapshotFilter {
            instance_name: Some("sage".into()),
            ..Default::default()
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(active.iter().all(|s| s.id != v1));

    let verification = engine.audit().verify_chain(None).unwrap();
    assert!(verification.ok, "{:?}", verification.breaks);
    assert!(verification.entries_checked >= 8);
}

#[test]
fn full_workflow_reopen_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let engine = Continuity::open(dir.path(), ContinuityConfig::default()).unwrap();
        engine.snapshots().create(base_draft(), "alice", None).unwrap()
    };

    let engine = Continuity::load(dir.path()).unwrap();
    let snap = engine.snapshots().get(id.as_str()).unwrap();
    assert_eq!(snap.metadata.instance_name, "sage");
    assert_eq!(engine.audit().entries(Some(id.as_str())).unwrap().len(), 1);
    assert!(engine.audit().verify_chain(None).unwrap().ok);
}

#[test]
fn full_workflow_invalid_draft_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Continuity::open(dir.path(), ContinuityConfig::default()).unwrap();

    let err = engine
        .snapshots()
        .create(
            SnapshotDraft::new("", "XXXX").with_trait("creativity", 1.5),
            "alice",
            None,
        )
        .unwrap_err();
    match err {
        ContinuityError::Validation { violations } => assert!(violations.len() >= 3),
        other => panic!("expected Validation, got {other:?}"),
    }
    assert!(engine.audit().entries(None).unwrap().is_empty());
    assert_eq!(
        engine
            .snapshots()
            .list(SnapshotFilter::default())
            .unwrap()
            .count(),
        0
    );
}
