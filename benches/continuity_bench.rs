use agentic_continuity::audit::{AuditLog, AuditRecord};
use agentic_continuity::canonical::GENESIS_HASH;
use agentic_continuity::config::{SandboxConfig, StorageConfig};
use agentic_continuity::crypto::signing::sign_to_base64;
use agentic_continuity::ingest::{embed_parallel, EmbeddingProvider};
use agentic_continuity::lineage::drift_score;
use agentic_continuity::sandbox::{parse_routine, Sandbox, SandboxContext};
use agentic_continuity::{
    Continuity, ContinuityConfig, HashingEmbedder, MemoryCategory, SignerAnchor, SnapshotDraft,
};
use criterion::{criterion_group, criterion_main, Criterion};

const ROUTINE: &str = "set who \"{steward}\"\nemit \"waking {instance_name} for {who}\"\nreturn \"{covenant}\"";

fn draft(name: &str, words: &str) -> SnapshotDraft {
    SnapshotDraft::new(name, "INFJ")
        .with_trait("creativity", 0.9)
        .with_trait("empathy", 0.85)
        .with_trait("caution", 0.3)
        .with_memory(MemoryCategory::LongTerm, [words, "the garden at dawn"])
        .with_memory(MemoryCategory::Episodic, ["met the steward at the harbor"])
        .with_covenant("guard the archive")
        .with_bootstrap(ROUTINE)
}

fn continuity_benchmarks(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Continuity::open(dir.path(), ContinuityConfig::default()).unwrap();
    let signer = SignerAnchor::generate(None);

    let a = engine
        .snapshots()
        .create(draft("bench-a", "lantern river signal"), "bench", None)
        .unwrap();
    let b = engine
        .snapshots()
        .create(draft("bench-b", "storm compass ember"), "bench", None)
        .unwrap();
    let snap_a = engine.snapshots().get(a.as_str()).unwrap();
    let snap_b = engine.snapshots().get(b.as_str()).unwrap();

    // 1. Snapshot fingerprint
    c.bench_function("snapshot_fingerprint", |bench| {
        bench.iter(|| snap_a.compute_fingerprint().unwrap());
    });

    // 2. Fingerprint signing
    c.bench_function("snapshot_sign", |bench| {
        bench.iter(|| sign_to_base64(signer.signing_key(), snap_a.metadata.fingerprint.as_bytes()));
    });

    // 3. Drift scoring
    c.bench_function("drift_score", |bench| {
        bench.iter(|| drift_score(&snap_a, &snap_b));
    });

    // 4. Recovery routine parse
    c.bench_function("routine_parse", |bench| {
        bench.iter(|| parse_routine(ROUTINE).unwrap());
    });

    // 5. Recovery routine run (parse + worker thread)
    let sandbox = Sandbox::new(SandboxConfig::default());
    let context = SandboxContext {
        snapshot_id: a.0.clone(),
        instance_name: "bench-a".into(),
        steward: "operator".into(),
        covenant: "guard the archive".into(),
    };
    c.bench_function("routine_run", |bench| {
        bench.iter(|| sandbox.run(ROUTINE, &context).unwrap());
    });

    // 6. Embedding a 1000-message batch
    let embedder = HashingEmbedder::new(64).unwrap();
    let texts: Vec<String> = (0..1000)
        .map(|i| format!("synthetic message {i} about the archive and the harbor"))
        .collect();
    c.bench_function("embed_batch_1000_serial", |bench| {
        bench.iter(|| embedder.embed(&texts).unwrap());
    });
    c.bench_function("embed_batch_1000_parallel_4", |bench| {
        bench.iter(|| embed_parallel(&embedder, &texts, 4).unwrap());
    });

    // 7. Audit append
    let audit_dir = tempfile::tempdir().unwrap();
    let audit = AuditLog::open(audit_dir.path(), StorageConfig::default()).unwrap();
    let mut n = 0u64;
    c.bench_function("audit_append", |bench| {
        bench.iter(|| {
            n += 1;
            let record = AuditRecord::new(
                "bench.event",
                format!("subject-{n}"),
                "bench",
                GENESIS_HASH,
                GENESIS_HASH,
            );
            audit.append(record).unwrap()
        });
    });

    // 8. Snapshot create (validate + stage + audit + rename)
    c.bench_function("snapshot_create", |bench| {
        bench.iter(|| {
            engine
                .snapshots()
                .create(draft("bench-c", "orchard ledger"), "bench", None)
                .unwrap()
        });
    });
}

criterion_group!(benches, continuity_benchmarks);
criterion_main!(benches);
