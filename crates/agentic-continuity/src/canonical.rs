//! Canonical serialization and hashing helpers shared by every component.
//!
//! Canonical form is compact JSON with object keys sorted lexicographically
//! at every depth. Fingerprints, audit entry hashes, and import batch hashes
//! are all SHA-256 over this form, hex encoded.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{ContinuityError, Result};

/// State hash of a subject that has no history yet.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Serialize any value into canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value =
        serde_json::to_value(value).map_err(|e| ContinuityError::Serialization(e.to_string()))?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out.into_bytes())
}

/// Canonical hash of `value` with the named fields removed from the
/// object found at `section` (or the top level when `section` is empty).
pub fn fingerprint_excluding<T: Serialize>(
    value: &T,
    section: &str,
    excluded: &[&str],
) -> Result<String> {
    let mut value =
        serde_json::to_value(value).map_err(|e| ContinuityError::Serialization(e.to_string()))?;

    let target = if section.is_empty() {
        Some(&mut value)
    } else {
        value.get_mut(section)
    };
    if let Some(Value::Object(map)) = target {
        for field in excluded {
            map.remove(*field);
        }
    }

    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(sha256_hex(out.as_bytes()))
}

/// Hex-encoded SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Derive a prefixed identifier: `{prefix}_` + base58 of the first 16 bytes
/// of SHA-256(input).
pub fn derive_id(prefix: &str, input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    let encoded = bs58::encode(&hash[..16]).into_string();
    format!("{prefix}_{encoded}")
}

/// `true` when `s` is a 64-character lowercase hex string.
pub fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_leaf(&Value::String((*key).clone()), out)?;
                out.push(':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        leaf => write_leaf(leaf, out)?,
    }
    Ok(())
}

fn write_leaf(value: &Value, out: &mut String) -> Result<()> {
    let s = serde_json::to_string(value).map_err(|e| ContinuityError::Serialization(e.to_string()))?;
    out.push_str(&s);
    Ok(())
}
