//! Passphrase protection for signer key files.
//!
//! The secret key is sealed with ChaCha20-Poly1305 under a key stretched
//! from the passphrase with Argon2id.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use zeroize::Zeroize;

use crate::crypto::random::{random_nonce_12, random_salt_16};
use crate::error::{ContinuityError, Result};

const ARGON2_M_COST: u32 = 65536; // 64 MiB
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

/// A sealed secret plus what is needed to open it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub salt: [u8; 16],
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

fn stretch(passphrase: &[u8], salt: &[u8; 16]) -> Result<[u8; 32]> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(32))
        .map_err(|e| ContinuityError::Encryption(format!("argon2 params: {e}")))?;
    let mut key = [0u8; 32];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(passphrase, salt, &mut key)
        .map_err(|e| ContinuityError::Encryption(format!("argon2: {e}")))?;
    Ok(key)
}

/// Seal `plaintext` under `passphrase` with a fresh salt and nonce.
pub fn seal(passphrase: &[u8], plaintext: &[u8]) -> Result<Sealed> {
    if passphrase.is_empty() {
        return Err(ContinuityError::Encryption("passphrase must not be empty".into()));
    }
    let salt = random_salt_16();
    let nonce = random_nonce_12();
    let mut key = stretch(passphrase, &salt)?;
    let sealed = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| ContinuityError::Encryption(format!("cipher init: {e}")))
        .and_then(|cipher| {
            cipher
                .encrypt(Nonce::from_slice(&nonce), plaintext)
                .map_err(|e| ContinuityError::Encryption(format!("encrypt: {e}")))
        });
    key.zeroize();
    Ok(Sealed {
        salt,
        nonce,
        ciphertext: sealed?,
    })
}

/// Open a sealed secret. A wrong passphrase and a modified ciphertext both
/// surface as `InvalidPassphrase`.
pub fn open(passphrase: &[u8], sealed: &Sealed) -> Result<Vec<u8>> {
    let mut key = stretch(passphrase, &sealed.salt)?;
    let opened = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| ContinuityError::Encryption(format!("cipher init: {e}")))
        .and_then(|cipher| {
            cipher
                .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
                .map_err(|_| ContinuityError::InvalidPassphrase)
        });
    key.zeroize();
    opened
}
