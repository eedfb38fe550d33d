//! Drift scoring between two snapshots.
//!
//! score = 0.40 × trait drift + 0.35 × memory drift + 0.25 × personality
//! drift, clamped to [0,1]. A term that cannot be computed contributes 0
//! and adds a warning instead of failing the comparison.

use std::collections::HashSet;

use crate::snapshot::{is_canonical_type, PersonalityDimensions, Snapshot};

use super::types::DriftReport;

pub const TRAIT_WEIGHT: f64 = 0.40;
pub const MEMORY_WEIGHT: f64 = 0.35;
pub const PERSONALITY_WEIGHT: f64 = 0.25;

/// Compare `parent` and `child`.
pub fn drift_score(parent: &Snapshot, child: &Snapshot) -> DriftReport {
    let mut warnings = Vec::new();

    let trait_drift = trait_drift(parent, child, &mut warnings);
    let memory_drift = memory_drift(parent, child);
    let personality_drift = personality_drift(parent, child, &mut warnings);

    let raw = TRAIT_WEIGHT * trait_drift
        + MEMORY_WEIGHT * memory_drift
        + PERSONALITY_WEIGHT * personality_drift;
    let score = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };

    for warning in &warnings {
        log::warn!(
            "drift {} -> {}: {warning}",
            parent.metadata.id,
            child.metadata.id
        );
    }

    DriftReport {
        score,
        trait_drift,
        memory_drift,
        personality_drift,
        warnings,
    }
}

/// Mean absolute difference over trait keys present in both snapshots.
fn trait_drift(parent: &Snapshot, child: &Snapshot, warnings: &mut Vec<String>) -> f64 {
    let mut total = 0.0;
    let mut shared = 0usize;
    for (key, &a) in &parent.traits {
        let Some(&b) = child.traits.get(key) else {
            continue;
        };
        if !in_unit(a) || !in_unit(b) {
            warnings.push(format!("trait '{key}' has a value outside [0,1]; ignored"));
            continue;
        }
        total += (a - b).abs();
        shared += 1;
    }
    if shared == 0 {
        if !parent.traits.is_empty() || !child.traits.is_empty() {
            warnings.push("no comparable trait keys; trait drift counted as 0".to_string());
        }
        return 0.0;
    }
    total / shared as f64
}

/// 1 − Jaccard similarity of the token sets of all memory entries.
fn memory_drift(parent: &Snapshot, child: &Snapshot) -> f64 {
    let a = tokenize(parent.memory_entries());
    let b = tokenize(child.memory_entries());
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    1.0 - intersection / union
}

/// Lowercased alphanumeric tokens.
pub fn tokenize<'a>(entries: impl Iterator<Item = &'a String>) -> HashSet<String> {
    entries
        .flat_map(|entry| entry.split(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Half type-letter mismatch, half mean dimension difference.
fn personality_drift(parent: &Snapshot, child: &Snapshot, warnings: &mut Vec<String>) -> f64 {
    let (a, b) = (&parent.personality, &child.personality);

    let letters = if is_canonical_type(&a.type_code) && is_canonical_type(&b.type_code) {
        let differing = a
            .type_code
            .bytes()
            .zip(b.type_code.bytes())
            .filter(|(x, y)| x != y)
            .count();
        differing as f64 / 4.0
    } else {
        warnings.push(format!(
            "personality types '{}' / '{}' are not comparable; letter term counted as 0",
            a.type_code, b.type_code
        ));
        0.0
    };

    let dimensions = match dimension_diff(&a.dimensions, &b.dimensions) {
        Some(d) => d,
        None => {
            warnings.push(
                "personality dimensions outside [0,1]; dimension term counted as 0".to_string(),
            );
            0.0
        }
    };

    0.5 * letters + 0.5 * dimensions
}

fn dimension_diff(a: &PersonalityDimensions, b: &PersonalityDimensions) -> Option<f64> {
    let (a, b) = (a.as_array(), b.as_array());
    if !a.iter().chain(b.iter()).all(|&v| in_unit(v)) {
        return None;
    }
    Some(a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum::<f64>() / 5.0)
}

fn in_unit(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}
