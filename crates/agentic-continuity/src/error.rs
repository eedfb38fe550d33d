//! Error types for AgenticContinuity.
//!
//! All errors are strongly typed and propagated without panicking.
//! Trigger phrases, private key material, and sandbox internals are never
//! included in error messages.

/// Continuity error types covering all operations.
#[derive(Debug, thiserror::Error)]
pub enum ContinuityError {
    #[error("Validation failed: {}", violations.join("; "))]
    Validation { violations: Vec<String> },

    #[error("Integrity check failed for {subject}: expected {expected}, actual {actual}")]
    Integrity {
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("Authenticity check failed for {subject}: {reason}")]
    Authenticity { subject: String, reason: String },

    #[error("Authorization failed for {subject}: trigger phrase mismatch")]
    Authorization { subject: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Comparison failed: {0}")]
    Comparison(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Execution timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Incomplete import {source_id}: expected {expected} messages, found {actual}")]
    IncompleteImport {
        source_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key encryption failed: {0}")]
    Encryption(String),

    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContinuityError {
    /// Build a validation error from a single violation.
    pub fn validation(violation: impl Into<String>) -> Self {
        Self::Validation {
            violations: vec![violation.into()],
        }
    }

    /// Stable tag used in audit metadata and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Integrity { .. } => "integrity_error",
            Self::Authenticity { .. } => "authenticity_error",
            Self::Authorization { .. } => "authorization_error",
            Self::NotFound(_) => "not_found_error",
            Self::Comparison(_) => "comparison_error",
            Self::Persistence(_) => "persistence_error",
            Self::Execution(_) => "execution_error",
            Self::Timeout { .. } => "timeout_error",
            Self::IncompleteImport { .. } => "incomplete_import_error",
            Self::InvalidKey(_) => "invalid_key",
            Self::Encryption(_) => "encryption_error",
            Self::InvalidPassphrase => "invalid_passphrase",
            Self::Serialization(_) => "serialization_error",
            Self::InvalidFileFormat(_) => "invalid_file_format",
            Self::Io(_) => "io_error",
        }
    }

    /// Collapse storage-medium failures into `Persistence`, leaving typed
    /// domain errors intact.
    pub fn into_persistence(self) -> Self {
        match self {
            Self::Io(e) => Self::Persistence(e.to_string()),
            Self::Serialization(msg) => Self::Persistence(msg),
            other => other,
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, ContinuityError>;
