//! Stress test: edits, deletions, and reordering of audit lines are all
//! detected, and archiving keeps the chain verifiable.

use std::path::{Path, PathBuf};

use agentic_continuity::audit::{AuditLog, AuditRecord};
use agentic_continuity::canonical::sha256_hex;
use agentic_continuity::config::StorageConfig;
use agentic_continuity::{Continuity, ContinuityConfig, MemoryCategory, SnapshotDraft};

const SNAPSHOTS: usize = 60;

fn populated(root: &Path) -> (Continuity, PathBuf) {
    let engine = Continuity::open(root, ContinuityConfig::default()).unwrap();
    for i in 0..SNAPSHOTS {
        let draft = SnapshotDraft::new(format!("agent-{}", i % 6), "ISTJ")
            .with_trait("rigor", 0.8)
            .with_memory(MemoryCategory::Procedural, [format!("procedure {i}")]);
        let id = engine.snapshots().create(draft, "auditor", None).unwrap();
        if i % 10 == 0 {
            engine.snapshots().deactivate(&id, "auditor", "rotation").unwrap();
        }
    }
    let active = engine.audit().active_path().to_path_buf();
    (engine, active)
}

fn lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn write_lines(path: &Path, lines: &[String]) {
    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(path, content).unwrap();
}

#[test]
fn stress_untouched_log_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = populated(dir.path());
    let verification = engine.audit().verify_chain(None).unwrap();
    assert!(verification.ok);
    assert_eq!(verification.entries_checked, (SNAPSHOTS + SNAPSHOTS / 10) as u64);
}

#[test]
fn stress_every_edited_line_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, active) = populated(dir.path());
    let original = lines(&active);

    for target in (0..original.len()).step_by(7) {
        let mut tampered = original.clone();
        tampered[target] = tampered[target].replace("\"auditor\"", "\"intruder\"");
        assert_ne!(tampered[target], original[target]);
        write_lines(&active, &tampered);

        let verification = engine.audit().verify_chain(None).unwrap();
        assert!(!verification.ok, "edit of line {target} went unnoticed");
        assert!(verification
            .breaks
            .iter()
            .any(|b| b.position == target as u64));
    }
    write_lines(&active, &original);
    assert!(engine.audit().verify_chain(None).unwrap().ok);
}

#[test]
fn stress_deleted_and_reordered_lines_are_detected() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, active) = populated(dir.path());
    let original = lines(&active);

    let mut deleted = original.clone();
    deleted.remove(original.len() / 2);
    write_lines(&active, &deleted);
    assert!(!engine.audit().verify_chain(None).unwrap().ok);

    let mut swapped = original.clone();
    swapped.swap(3, 4);
    write_lines(&active, &swapped);
    assert!(!engine.audit().verify_chain(None).unwrap().ok);

    let mut truncated = original.clone();
    truncated.drain(..5);
    write_lines(&active, &truncated);
    assert!(!engine.audit().verify_chain(None).unwrap().ok);
}

#[test]
fn stress_archive_relocates_without_loss() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, active) = populated(dir.path());
    let total = lines(&active).len();

    let first = engine.audit().archive(20).unwrap();
    assert_eq!(first.relocated as usize, total - 20);
    assert!(first.segment.as_ref().unwrap().exists());
    assert_eq!(lines(&active).len(), 20);

    // Appends continue the chain across the segment boundary.
    engine
        .snapshots()
        .create(
            SnapshotDraft::new("late", "ENFP").with_memory(MemoryCategory::ShortTerm, ["late"]),
            "auditor",
            None,
        )
        .unwrap();
    engine.audit().archive(5).unwrap();

    let entries = engine.audit().entries(None).unwrap();
    assert_eq!(entries.len(), total + 1);
    assert!(entries.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));
    let verification = engine.audit().verify_chain(None).unwrap();
    assert!(verification.ok, "{:?}", verification.breaks);
}

fn advance(log: &AuditLog, subject: &str, label: &str) {
    let prior = log.subject_tip(subject).unwrap();
    log.append(AuditRecord::new(
        "test.step",
        subject,
        "auditor",
        prior,
        sha256_hex(label.as_bytes()),
    ))
    .unwrap();
}

#[test]
fn stress_archive_by_other_handle_keeps_subject_chain() {
    let dir = tempfile::tempdir().unwrap();
    let a = AuditLog::open(dir.path(), StorageConfig::default()).unwrap();
    let b = AuditLog::open(dir.path(), StorageConfig::default()).unwrap();

    for i in 0..10 {
        advance(&a, "x", &format!("x{i}"));
    }
    assert_eq!(b.entries(Some("x")).unwrap().len(), 10);
    b.subject_tip("x").unwrap();

    // A rewrites the active file, then grows it past B's cached offset.
    a.archive(0).unwrap();
    advance(&a, "s", "s0");
    for i in 0..30 {
        advance(&a, "y", &format!("y{i}"));
    }

    assert_eq!(b.subject_tip("s").unwrap(), a.subject_tip("s").unwrap());
    advance(&b, "s", "s1");
    advance(&a, "x", "x-final");

    let verification = a.verify_chain(None).unwrap();
    assert!(verification.ok, "{:?}", verification.breaks);
    assert_eq!(verification.entries_checked, 43);
    assert_eq!(b.entries(Some("s")).unwrap().len(), 2);
}
