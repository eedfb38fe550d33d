//! Cryptographic primitives for AgenticContinuity.
//!
//! This module provides:
//! - Ed25519 signer identities, key files, signing, and verification
//! - Passphrase encryption of key files (Argon2id + ChaCha20-Poly1305)
//! - Cryptographically secure random salts for instance derivation

pub mod encryption;
pub mod keys;
pub mod random;
pub mod signing;

pub use keys::{SignerAnchor, SignerId};
