//! Scale test: import 15,000 messages in batches of 1,000, interrupt in the
//! middle of batch 7, and resume.
//!
//! The final store must hold every message exactly once.

use std::collections::HashSet;
use std::path::Path;

use agentic_continuity::config::{ContinuityConfig, IngestConfig};
use agentic_continuity::ingest::{ImportBatch, ImportedMessage};
use agentic_continuity::{CancellationToken, CheckpointStatus, Continuity, IngestMessage};

const TOTAL: usize = 15_000;
const BATCH: usize = 1_000;

fn open(root: &Path) -> Continuity {
    let config = ContinuityConfig {
        ingest: IngestConfig {
            batch_size: BATCH,
            embedding_workers: 4,
            spot_sample: 3,
            embedding_dimension: 8,
        },
        ..Default::default()
    };
    Continuity::open(root, config).unwrap()
}

fn corpus() -> impl Iterator<Item = IngestMessage> {
    (0..TOTAL).map(|i| {
        let mut message = IngestMessage::new(format!("synthetic message {i} about topic {}", i % 37));
        message.author = Some(format!("author-{}", i % 5));
        message.timestamp = Some(1_700_000_000_000_000 + i as u64);
        message
    })
}

fn stored_hashes(engine: &Continuity, source: &str) -> (usize, HashSet<String>) {
    let mut total = 0;
    let mut hashes = HashSet::new();
    for index in engine.snapshots().import_batches(source).unwrap() {
        let batch = engine.snapshots().load_import_batch(source, index).unwrap();
        total += batch.messages.len();
        hashes.extend(batch.messages.into_iter().map(|m| m.content_hash));
    }
    (total, hashes)
}

/// Stop the stream halfway through batch 7 (index 6).
fn interrupted_run(engine: &Continuity, source: &str) {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let stream = corpus().enumerate().map(move |(i, m)| {
        if i == 6 * BATCH + BATCH / 2 {
            trigger.cancel();
        }
        m
    });
    let report = engine.ingest().ingest(source, stream, Some(&token)).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.batches_committed, 6);

    let checkpoint = engine.ingest().checkpoint(source).unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::InProgress);
    assert_eq!(checkpoint.next_batch_index, 6);
    assert_eq!(checkpoint.processed_count, 6_000);
}

#[test]
fn stress_ingest_resume_after_interrupt() {
    let dir = tempfile::tempdir().unwrap();
    let source = "corpus-a";

    {
        let engine = open(dir.path());
        interrupted_run(&engine, source);
    }

    // A fresh handle stands in for the restarted process.
    let engine = open(dir.path());
    let report = engine.ingest().resume(source, corpus(), None).unwrap();
    assert_eq!(report.status, CheckpointStatus::Completed);
    assert_eq!(report.processed_count, TOTAL as u64);
    assert_eq!(report.duplicates_skipped, 6_000);
    assert_eq!(report.batches_committed, 9);

    let (total, hashes) = stored_hashes(&engine, source);
    assert_eq!(total, TOTAL);
    assert_eq!(hashes.len(), TOTAL, "duplicate content hashes stored");

    let verification = engine.ingest().verify(source).unwrap();
    assert!(verification.ok);
    assert_eq!(verification.actual_count, TOTAL as u64);
    assert_eq!(verification.sampled_batches, vec![12, 13, 14]);
    assert!(engine.audit().verify_chain(None).unwrap().ok);
}

#[test]
fn stress_ingest_resume_overwrites_orphan_batch() {
    let dir = tempfile::tempdir().unwrap();
    let source = "corpus-b";
    let engine = open(dir.path());
    interrupted_run(&engine, source);

    // Batch 7 reached disk but the checkpoint never moved.
    let orphan: Vec<ImportedMessage> = corpus()
        .skip(6 * BATCH)
        .take(BATCH / 2)
        .map(|m| ImportedMessage {
            content_hash: m.content_hash(),
            text: m.text,
            author: m.author,
            timestamp: m.timestamp,
            embedding: vec![0.0; 8],
        })
        .collect();
    let batch = ImportBatch::seal(source, 6, orphan).unwrap();
    engine
        .snapshots()
        .commit_import_batch(&batch, "crashed-run")
        .unwrap();
    assert!(engine.ingest().verify(source).is_err());

    let report = engine.ingest().resume(source, corpus(), None).unwrap();
    assert_eq!(report.status, CheckpointStatus::Completed);

    let (total, hashes) = stored_hashes(&engine, source);
    assert_eq!(total, TOTAL);
    assert_eq!(hashes.len(), TOTAL);
    assert_eq!(
        engine.snapshots().load_import_batch(source, 6).unwrap().messages.len(),
        BATCH
    );
    assert!(engine.ingest().verify(source).unwrap().ok);
}

#[test]
fn stress_ingest_rerun_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    engine.ingest().ingest("corpus-c", corpus(), None).unwrap();
    let entries_before = engine.audit().entries(None).unwrap().len();

    let again = engine.ingest().ingest("corpus-c", corpus(), None).unwrap();
    assert_eq!(again.batches_committed, 0);
    assert_eq!(again.duplicates_skipped, TOTAL as u64);
    assert_eq!(engine.audit().entries(None).unwrap().len(), entries_before);
}
