//! Signer identities — the Ed25519 key pairs that vouch for snapshots.
//!
//! A signer's public key IS its identity. Snapshots record the signer id and
//! public key inside the fingerprinted document and carry a detached
//! signature over the fingerprint.

use std::path::Path;

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{ContinuityError, Result};
use crate::crypto::encryption;
use crate::storage::fsutil::write_private;

const KEY_FILE_VERSION: u32 = 1;
const KEY_FILE_FORMAT: &str = "asig-v1";
const KEY_ALGORITHM: &str = "chacha20-poly1305";
const KEY_KDF: &str = "argon2id";

/// Unique identifier for a signer.
///
/// Format: `asig_` + base58 of first 16 bytes of SHA-256(public_key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignerId(pub String);

impl SignerId {
    /// Compute a signer ID from a verifying (public) key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let hash = Sha256::digest(key.as_bytes());
        let encoded = bs58::encode(&hash[..16]).into_string();
        Self(format!("asig_{encoded}"))
    }
}

impl std::fmt::Display for SignerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An Ed25519 signer.
///
/// The signing key bytes are zeroized on drop.
pub struct SignerAnchor {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    /// Human-readable name (optional).
    pub name: Option<String>,
}

impl SignerAnchor {
    /// Generate a new signer with a fresh key pair.
    pub fn generate(name: Option<String>) -> Self {
        let signing_key = SigningKey::generate(&mut rand::thread_rng());
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            name,
        }
    }

    /// Reconstruct a signer from raw signing key bytes.
    pub fn from_signing_key_bytes(bytes: &[u8; 32], name: Option<String>) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            name,
        }
    }

    /// Return the signer ID (derived from public key).
    pub fn id(&self) -> SignerId {
        SignerId::from_verifying_key(&self.verifying_key)
    }

    /// Return a reference to the signing key.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Return the verifying (public) key.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Return the public key as base64.
    pub fn public_key_base64(&self) -> String {
        base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            self.verifying_key.to_bytes(),
        )
    }

    /// Persist the signer to a key file, sealing the secret key under
    /// `passphrase`. On unix the file is readable by its owner only.
    pub fn save(&self, path: &Path, passphrase: &str) -> Result<()> {
        let mut secret = self.signing_key.to_bytes();
        let sealed = encryption::seal(passphrase.as_bytes(), &secret);
        secret.zeroize();
        let sealed = sealed?;

        let file = KeyFile {
            version: KEY_FILE_VERSION,
            format: KEY_FILE_FORMAT.to_string(),
            signer_id: self.id(),
            name: self.name.clone(),
            public_key: self.public_key_base64(),
            encryption: KeyEncryption {
                algorithm: KEY_ALGORITHM.to_string(),
                kdf: KEY_KDF.to_string(),
                salt: b64_encode(sealed.salt),
                nonce: b64_encode(sealed.nonce),
            },
            encrypted_secret: b64_encode(&sealed.ciphertext),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| ContinuityError::Serialization(e.to_string()))?;
        write_private(path, &json)
    }

    /// Load a signer from a key file written by [`SignerAnchor::save`].
    pub fn load(path: &Path, passphrase: &str) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let file: KeyFile = serde_json::from_slice(&bytes).map_err(|e| {
            ContinuityError::InvalidFileFormat(format!("failed to parse key file: {e}"))
        })?;

        if file.version != KEY_FILE_VERSION
            || file.format != KEY_FILE_FORMAT
            || file.encryption.algorithm != KEY_ALGORITHM
            || file.encryption.kdf != KEY_KDF
        {
            return Err(ContinuityError::InvalidFileFormat(format!(
                "unsupported key file version={} format={} algorithm={} kdf={}",
                file.version, file.format, file.encryption.algorithm, file.encryption.kdf
            )));
        }

        let sealed = encryption::Sealed {
            salt: b64_decode_array(&file.encryption.salt, "salt")?,
            nonce: b64_decode_array(&file.encryption.nonce, "nonce")?,
            ciphertext: b64_decode(&file.encrypted_secret, "encrypted secret")?,
        };
        let mut opened = encryption::open(passphrase.as_bytes(), &sealed)?;
        let secret: std::result::Result<[u8; 32], _> = opened.as_slice().try_into();
        opened.zeroize();
        let mut secret =
            secret.map_err(|_| ContinuityError::InvalidKey("secret key must be 32 bytes".into()))?;

        let anchor = Self::from_signing_key_bytes(&secret, file.name);
        secret.zeroize();

        if anchor.id() != file.signer_id {
            return Err(ContinuityError::InvalidKey(format!(
                "key file signer id {} does not match key material",
                file.signer_id
            )));
        }
        Ok(anchor)
    }
}

fn b64_encode(bytes: impl AsRef<[u8]>) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

fn b64_decode(value: &str, what: &str) -> Result<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, value)
        .map_err(|e| ContinuityError::InvalidFileFormat(format!("invalid {what} base64: {e}")))
}

fn b64_decode_array<const N: usize>(value: &str, what: &str) -> Result<[u8; N]> {
    b64_decode(value, what)?
        .try_into()
        .map_err(|_| ContinuityError::InvalidFileFormat(format!("{what} must be {N} bytes")))
}

impl Drop for SignerAnchor {
    fn drop(&mut self) {
        let mut bytes = self.signing_key.to_bytes();
        bytes.zeroize();
    }
}

/// Decode a base64 public key into a verifying key.
pub fn verifying_key_from_base64(public_key_b64: &str) -> Result<VerifyingKey> {
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, public_key_b64)
        .map_err(|e| ContinuityError::InvalidKey(format!("invalid public key base64: {e}")))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ContinuityError::InvalidKey("public key must be 32 bytes".into()))?;
    VerifyingKey::from_bytes(&array)
        .map_err(|e| ContinuityError::InvalidKey(format!("invalid verifying key: {e}")))
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    version: u32,
    format: String,
    signer_id: SignerId,
    name: Option<String>,
    public_key: String,
    encryption: KeyEncryption,
    /// Sealed Ed25519 secret key.
    encrypted_secret: String,
}

#[derive(Serialize, Deserialize)]
struct KeyEncryption {
    algorithm: String,
    kdf: String,
    salt: String,
    nonce: String,
}
