//! Property test: drift scoring over many randomly generated snapshot
//! pairs stays bounded, symmetric, and zero on identical input.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use agentic_continuity::lineage::drift_score;
use agentic_continuity::snapshot::{
    ContinuityMetadata, PersonalityProfile, ResurrectionMetadata, SnapshotMetadata,
    PERSONALITY_TYPES,
};
use agentic_continuity::{MemoryCategory, PersonalityDimensions, Snapshot, SnapshotId};

const CASES: usize = 2_000;
const WORDS: [&str; 12] = [
    "garden", "dawn", "river", "ledger", "lantern", "archive", "storm", "harbor", "signal",
    "orchard", "compass", "ember",
];
const TRAITS: [&str; 6] = [
    "creativity",
    "empathy",
    "caution",
    "curiosity",
    "patience",
    "rigor",
];

fn random_snapshot(rng: &mut StdRng) -> Snapshot {
    let mut traits = BTreeMap::new();
    for key in TRAITS {
        if rng.gen_bool(0.6) {
            traits.insert(key.to_string(), rng.gen_range(0.0..=1.0));
        }
    }

    let mut memory = BTreeMap::new();
    for category in MemoryCategory::ALL {
        if rng.gen_bool(0.4) {
            let entries = (0..rng.gen_range(1..4))
                .map(|_| {
                    (0..rng.gen_range(1..5))
                        .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect();
            memory.insert(category, entries);
        }
    }

    let code = PERSONALITY_TYPES[rng.gen_range(0..PERSONALITY_TYPES.len())];
    let dims = PersonalityDimensions::new([
        rng.gen_range(0.0..=1.0),
        rng.gen_range(0.0..=1.0),
        rng.gen_range(0.0..=1.0),
        rng.gen_range(0.0..=1.0),
        rng.gen_range(0.0..=1.0),
    ]);

    Snapshot {
        metadata: SnapshotMetadata {
            id: SnapshotId(format!("asnap_{}", rng.gen::<u32>())),
            instance_name: "prop".into(),
            created_at: 0,
            version: 1,
            previous_version: None,
            tags: vec![],
            fingerprint: String::new(),
            signer: None,
            signature: None,
        },
        traits,
        personality: PersonalityProfile::new(code, dims),
        memory,
        continuity: ContinuityMetadata::default(),
        resurrection: ResurrectionMetadata::default(),
    }
}

#[test]
fn stress_drift_bounded_and_symmetric() {
    let mut rng = StdRng::seed_from_u64(0x00C0_FFEE);
    for case in 0..CASES {
        let a = random_snapshot(&mut rng);
        let b = random_snapshot(&mut rng);

        let ab = drift_score(&a, &b);
        let ba = drift_score(&b, &a);
        assert!(
            (0.0..=1.0).contains(&ab.score),
            "case {case}: score {} out of range",
            ab.score
        );
        assert!((ab.score - ba.score).abs() < 1e-12, "case {case}: asymmetric");
        assert!(ab.drift_index() <= 10);
        for term in [ab.trait_drift, ab.memory_drift, ab.personality_drift] {
            assert!((0.0..=1.0).contains(&term), "case {case}: term {term}");
        }
    }
}

#[test]
fn stress_drift_identity_is_zero() {
    let mut rng = StdRng::seed_from_u64(7);
    for case in 0..CASES {
        let a = random_snapshot(&mut rng);
        let report = drift_score(&a, &a.clone());
        assert_eq!(report.score, 0.0, "case {case}");
        assert_eq!(report.drift_index(), 0);
    }
}

#[test]
fn stress_drift_survives_malformed_values() {
    let mut rng = StdRng::seed_from_u64(99);
    let poison = [f64::NAN, f64::INFINITY, -1.0, 2.5];
    for case in 0..CASES / 4 {
        let mut a = random_snapshot(&mut rng);
        let b = random_snapshot(&mut rng);
        let value = poison[case % poison.len()];
        a.traits.insert(TRAITS[0].to_string(), value);
        a.personality.dimensions.neuroticism = value;
        if case % 3 == 0 {
            a.personality.type_code = "NOPE".into();
        }

        let report = drift_score(&a, &b);
        assert!(report.score.is_finite(), "case {case}");
        assert!((0.0..=1.0).contains(&report.score));
        assert!(!report.warnings.is_empty());
    }
}
