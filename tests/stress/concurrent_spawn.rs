//! Stress test: many threads register instances under the same anchor key.
//!
//! Exactly one root must exist, every spawn must be recorded once, and the
//! audit chain must stay intact.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use agentic_continuity::lineage::anchor_subject;
use agentic_continuity::{Continuity, ContinuityConfig, MemoryCategory, SnapshotDraft};

const THREADS: usize = 8;
const PER_THREAD: usize = 10;

#[test]
fn stress_concurrent_spawn_single_anchor() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(Continuity::open(dir.path(), ContinuityConfig::default()).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|_| {
                        engine
                            .lineage()
                            .spawn_instance("anchor-shared", &format!("worker-{t}"))
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let ids: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(ids.len(), THREADS * PER_THREAD);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());

    let instances = engine.lineage().instances("anchor-shared").unwrap();
    assert_eq!(instances.len(), THREADS * PER_THREAD);
    let roots: Vec<_> = instances.iter().filter(|e| e.is_root).collect();
    assert_eq!(roots.len(), 1);
    let root = &roots[0].instance_id;
    assert!(instances
        .iter()
        .filter(|e| !e.is_root)
        .all(|e| e.parent_instance.as_ref() == Some(root)));

    let subject = anchor_subject("anchor-shared");
    assert_eq!(
        engine.audit().entries(Some(&subject)).unwrap().len(),
        THREADS * PER_THREAD
    );
    let verification = engine.audit().verify_chain(None).unwrap();
    assert!(verification.ok, "{:?}", verification.breaks);
}

#[test]
fn stress_two_handles_share_one_root() {
    let dir = tempfile::tempdir().unwrap();
    let a = Arc::new(Continuity::open(dir.path(), ContinuityConfig::default()).unwrap());
    let b = Arc::new(Continuity::open(dir.path(), ContinuityConfig::default()).unwrap());

    let handles: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .enumerate()
        .flat_map(|(h, engine)| {
            (0..2).map(move |t| {
                let engine = engine.clone();
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let anchor = if i % 2 == 0 { "anchor-even" } else { "anchor-odd" };
                        engine
                            .lineage()
                            .spawn_instance(anchor, &format!("handle-{h}-{t}"))
                            .unwrap();
                    }
                })
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let even = a.lineage().instances("anchor-even").unwrap();
    let odd = b.lineage().instances("anchor-odd").unwrap();
    assert_eq!(even.len() + odd.len(), 4 * PER_THREAD);
    assert_eq!(even.iter().filter(|e| e.is_root).count(), 1);
    assert_eq!(odd.iter().filter(|e| e.is_root).count(), 1);

    for engine in [&a, &b] {
        let verification = engine.audit().verify_chain(None).unwrap();
        assert!(verification.ok, "{:?}", verification.breaks);
        assert_eq!(verification.entries_checked, (4 * PER_THREAD) as u64);
    }
}

#[test]
fn stress_concurrent_snapshot_creation() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(Continuity::open(dir.path(), ContinuityConfig::default()).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let draft = SnapshotDraft::new(format!("agent-{t}"), "ENTP")
                        .with_trait("focus", (i as f64) / 10.0)
                        .with_memory(MemoryCategory::Episodic, [format!("event {i}")]);
                    engine.snapshots().create(draft, "writer", None).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let all: Vec<_> = engine
        .snapshots()
        .list(Default::default())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(all.len(), THREADS * PER_THREAD);
    assert!(engine.audit().verify_chain(None).unwrap().ok);
}

#[test]
fn stress_concurrent_spawn_from_parents_match_registry() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(Continuity::open(dir.path(), ContinuityConfig::default()).unwrap());
    let source = engine
        .snapshots()
        .create(
            SnapshotDraft::new("seed", "INTJ")
                .with_trait("focus", 0.7)
                .with_memory(MemoryCategory::LongTerm, ["origin"]),
            "writer",
            None,
        )
        .unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = Arc::clone(&engine);
            let source = source.clone();
            thread::spawn(move || {
                (0..3)
                    .map(|_| {
                        engine
                            .lineage()
                            .spawn_from("anchor-fresh", source.as_str(), &format!("worker-{t}"))
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let spawned: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(spawned.len(), THREADS * 3);

    let instances = engine.lineage().instances("anchor-fresh").unwrap();
    assert_eq!(instances.iter().filter(|e| e.is_root).count(), 1);
    for entry in &instances {
        let snapshot_id = entry.snapshot_id.as_ref().unwrap();
        let snapshot = engine.snapshots().get(snapshot_id.as_str()).unwrap();
        assert_eq!(
            snapshot.continuity.parent_instance,
            entry.parent_instance.as_ref().map(|p| p.0.clone()),
            "snapshot of {} disagrees with the registry",
            entry.instance_id
        );
    }
    assert!(engine.audit().verify_chain(None).unwrap().ok);
}
