//! Identity snapshots — versioned, fingerprinted documents.
//!
//! A snapshot bundles traits, memory, a personality profile, lineage
//! metadata, and a bound recovery routine. Snapshots are never edited in
//! place: a changed state is a new version, and deactivation is a status
//! flag kept outside the fingerprinted document.

pub mod store;
pub mod types;
pub mod validate;

pub use store::{import_subject, state_hash, SnapshotFilter, SnapshotIter, SnapshotStore};
pub use types::{
    derive_bias_tags, is_canonical_type, ContinuityMetadata, MemoryCategory, MemoryLog,
    PersonalityDimensions, PersonalityProfile, ResurrectionMetadata, SignerInfo, Snapshot,
    SnapshotDraft, SnapshotId, SnapshotMetadata, SnapshotStatus, SnapshotSummary,
    ValidationReport, PERSONALITY_TYPES,
};
pub use validate::{check_signature, validate_draft, validate_snapshot};
