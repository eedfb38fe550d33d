//! Structural and integrity checks for snapshots and drafts.

use std::collections::BTreeMap;

use crate::canonical::is_hex_digest;
use crate::crypto::{keys, signing, SignerId};
use crate::sandbox::parse_routine;

use super::types::{
    is_canonical_type, MemoryLog, PersonalityDimensions, Snapshot, SnapshotDraft,
    ValidationReport,
};

/// Highest allowed drift index.
pub const MAX_DRIFT_INDEX: u8 = 10;

/// Violations in a draft; empty means it may be persisted.
pub fn validate_draft(draft: &SnapshotDraft) -> Vec<String> {
    let mut violations = Vec::new();
    check_content(
        &draft.instance_name,
        &draft.traits,
        &draft.memory,
        &draft.personality_type,
        &draft.dimensions,
        draft.drift_index.unwrap_or(0),
        &draft.resurrection.bootstrap_routine,
        &mut violations,
    );
    violations
}

/// Full check of a stored document: structure, fingerprint, signature and
/// bootstrap routine syntax.
pub fn validate_snapshot(snapshot: &Snapshot) -> ValidationReport {
    let mut violations = Vec::new();
    let meta = &snapshot.metadata;

    if !meta.id.as_str().starts_with("asnap_") {
        violations.push(format!("malformed snapshot id '{}'", meta.id));
    }
    check_content(
        &meta.instance_name,
        &snapshot.traits,
        &snapshot.memory,
        &snapshot.personality.type_code,
        &snapshot.personality.dimensions,
        snapshot.continuity.drift_index,
        &snapshot.resurrection.bootstrap_routine,
        &mut violations,
    );

    if !is_hex_digest(&meta.fingerprint) {
        violations.push("fingerprint is not a 64-character hex digest".to_string());
    }
    match snapshot.compute_fingerprint() {
        Ok(actual) if actual == meta.fingerprint => {}
        Ok(actual) => violations.push(format!(
            "fingerprint mismatch: stored {}, computed {actual}",
            meta.fingerprint
        )),
        Err(e) => violations.push(format!("fingerprint could not be computed: {e}")),
    }

    if let Err(reason) = check_signature(snapshot) {
        violations.push(reason);
    }

    ValidationReport {
        ok: violations.is_empty(),
        violations,
    }
}

/// Verify the embedded signer against its key and the signature against the
/// fingerprint. Unsigned snapshots pass.
pub fn check_signature(snapshot: &Snapshot) -> std::result::Result<(), String> {
    let meta = &snapshot.metadata;
    match (&meta.signer, &meta.signature) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err("signature present without signer".to_string()),
        (Some(_), None) => Err("signer recorded but signature missing".to_string()),
        (Some(signer), Some(signature)) => {
            let key = keys::verifying_key_from_base64(&signer.public_key)
                .map_err(|e| format!("signer public key unusable: {e}"))?;
            if SignerId::from_verifying_key(&key) != signer.signer_id {
                return Err(format!(
                    "signer id {} does not match its public key",
                    signer.signer_id
                ));
            }
            match signing::verify_from_base64(&key, meta.fingerprint.as_bytes(), signature) {
                Ok(true) => Ok(()),
                Ok(false) => Err("signature does not verify".to_string()),
                Err(e) => Err(format!("signature malformed: {e}")),
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn check_content(
    instance_name: &str,
    traits: &BTreeMap<String, f64>,
    memory: &MemoryLog,
    type_code: &str,
    dimensions: &PersonalityDimensions,
    drift_index: u8,
    bootstrap_routine: &str,
    violations: &mut Vec<String>,
) {
    if instance_name.trim().is_empty() {
        violations.push("instance_name must not be empty".to_string());
    }

    for (key, value) in traits {
        if key.trim().is_empty() {
            violations.push("trait keys must not be empty".to_string());
        }
        if !value.is_finite() || !(0.0..=1.0).contains(value) {
            violations.push(format!("trait '{key}' = {value} is outside [0,1]"));
        }
    }

    for (category, entries) in memory {
        for (i, entry) in entries.iter().enumerate() {
            if entry.trim().is_empty() {
                violations.push(format!(
                    "memory entry {}[{i}] is empty",
                    category.as_tag()
                ));
            }
        }
    }

    if !is_canonical_type(type_code) {
        violations.push(format!(
            "personality type '{type_code}' is not one of the 16 canonical codes"
        ));
    }
    for (name, value) in PersonalityDimensions::NAMES
        .iter()
        .zip(dimensions.as_array())
    {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            violations.push(format!("personality dimension {name} = {value} is outside [0,1]"));
        }
    }

    if drift_index > MAX_DRIFT_INDEX {
        violations.push(format!(
            "drift_index {drift_index} exceeds {MAX_DRIFT_INDEX}"
        ));
    }

    if let Err(e) = parse_routine(bootstrap_routine) {
        violations.push(format!("bootstrap routine does not parse: {e}"));
    }
}
