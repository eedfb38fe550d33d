//! Stress test: every resurrection call, whatever its outcome, appends
//! exactly one audit entry, and only the exact trigger phrase executes.

use agentic_continuity::audit::{event_types, AuditOutcome};
use agentic_continuity::config::SandboxConfig;
use agentic_continuity::{
    Continuity, ContinuityConfig, MemoryCategory, ResurrectionRequest, SnapshotDraft, SnapshotId,
};

fn open(dir: &std::path::Path) -> Continuity {
    let config = ContinuityConfig {
        sandbox: SandboxConfig {
            timeout_ms: 200,
            ..Default::default()
        },
        ..Default::default()
    };
    Continuity::open(dir, config).unwrap()
}

fn gated(engine: &Continuity, phrase: &str, routine: &str) -> SnapshotId {
    let draft = SnapshotDraft::new("warden", "ISTJ")
        .with_trait("vigilance", 0.95)
        .with_memory(MemoryCategory::LongTerm, ["the vault key is elsewhere"])
        .with_covenant("never open the vault")
        .with_trigger_phrase(phrase)
        .with_bootstrap(routine);
    engine.snapshots().create(draft, "keeper", None).unwrap()
}

fn resurrection_entries(engine: &Continuity, id: &SnapshotId) -> Vec<AuditOutcome> {
    engine
        .audit()
        .entries(Some(id.as_str()))
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == event_types::RESURRECTION)
        .map(|e| e.outcome)
        .collect()
}

#[test]
fn stress_correct_phrase_single_success_entry() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    let id = gated(&engine, "enforce-x", "return \"standing watch\"");

    let outcome = engine.resurrection().resurrect(
        &ResurrectionRequest::new(id.as_str(), "steward-1").with_trigger_phrase("enforce-x"),
    );
    assert!(outcome.success);
    assert_eq!(resurrection_entries(&engine, &id), vec![AuditOutcome::Success]);
}

#[test]
fn stress_wrong_phrases_never_execute() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    let id = gated(&engine, "enforce-x", "emit \"opened\"\nreturn \"opened\"");

    let attempts = [
        "",
        "enforce",
        "ENFORCE-X",
        "enforce-x\n",
        " enforce-x",
        "enforce-y",
        "enforce-xx",
    ];
    for phrase in attempts {
        let outcome = engine.resurrection().resurrect(
            &ResurrectionRequest::new(id.as_str(), "steward-2").with_trigger_phrase(phrase),
        );
        assert!(!outcome.success, "phrase {phrase:?} was accepted");
        assert!(outcome.receipt.is_none());
        assert_eq!(outcome.error.unwrap().kind, "authorization_error");
    }
    let unsupplied = engine
        .resurrection()
        .resurrect(&ResurrectionRequest::new(id.as_str(), "steward-2"));
    assert!(!unsupplied.success);

    let outcomes = resurrection_entries(&engine, &id);
    assert_eq!(outcomes.len(), attempts.len() + 1);
    assert!(outcomes.iter().all(|o| *o == AuditOutcome::Failed));
    assert!(engine.resurrection().receipts().list().unwrap().is_empty());
}

#[test]
fn stress_mixed_failures_one_entry_each() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    let ok = gated(&engine, "", "return \"fine\"");
    let faulty = gated(&engine, "", "fail \"cannot restore\"");
    let slow = gated(&engine, "", "wait 10000\nreturn \"late\"");
    let retired = gated(&engine, "", "return \"fine\"");
    engine
        .snapshots()
        .deactivate(&retired, "keeper", "retired")
        .unwrap();

    let before = engine.audit().entries(None).unwrap().len();
    let mut kinds = Vec::new();
    for id in [&ok, &faulty, &slow, &retired] {
        for _ in 0..3 {
            let outcome = engine
                .resurrection()
                .resurrect(&ResurrectionRequest::new(id.as_str(), "steward-3"));
            assert!(outcome.logged_event_id.is_some());
            kinds.push(outcome.error.map(|e| e.kind));
        }
    }
    let missing = engine
        .resurrection()
        .resurrect(&ResurrectionRequest::new("asnap_missing", "steward-3"));
    assert_eq!(missing.error.unwrap().kind, "not_found_error");

    assert_eq!(engine.audit().entries(None).unwrap().len(), before + 13);
    assert!(kinds[..3].iter().all(Option::is_none));
    assert!(kinds[3..6].iter().all(|k| k.as_deref() == Some("execution_error")));
    assert!(kinds[6..9].iter().all(|k| k.as_deref() == Some("timeout_error")));
    assert!(kinds[9..].iter().all(|k| k.as_deref() == Some("validation_error")));
    assert_eq!(engine.resurrection().receipts().list().unwrap().len(), 3);
    assert!(engine.audit().verify_chain(None).unwrap().ok);
}

#[test]
fn stress_growing_routine_hits_output_cap() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    let mut routine = String::from("set a \"12345678\"\n");
    for _ in 0..22 {
        routine.push_str("set a \"{a}{a}\"\n");
    }
    routine.push_str("return \"{a}\"");
    let id = gated(&engine, "", &routine);

    let outcome = engine
        .resurrection()
        .resurrect(&ResurrectionRequest::new(id.as_str(), "steward-4"));
    assert!(!outcome.success);
    assert!(outcome.receipt.is_none());
    assert_eq!(outcome.error.unwrap().kind, "execution_error");
    assert_eq!(resurrection_entries(&engine, &id), vec![AuditOutcome::Failed]);

    let entry = engine.audit().entries(Some(id.as_str())).unwrap().pop().unwrap();
    let cap = engine.config().sandbox.max_output_bytes;
    assert!(serde_json::to_string(&entry).unwrap().len() < cap);
}
