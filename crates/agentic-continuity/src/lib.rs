//! AgenticContinuity — verifiable identity continuity for AI agents.
//!
//! Provides fingerprinted identity snapshots, lineage tracking with drift
//! scoring, a hash-chained audit log, gated resurrection through a
//! whitelisted recovery routine, and resumable batch ingestion of
//! external message corpora.

pub mod audit;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod lineage;
pub mod resurrection;
pub mod sandbox;
pub mod snapshot;
pub mod storage;
pub mod time;

// Re-export primary types
pub use config::ContinuityConfig;
pub use engine::Continuity;
pub use error::{ContinuityError, Result};

// Re-export snapshot types
pub use snapshot::{
    MemoryCategory, PersonalityDimensions, PersonalityProfile, Snapshot, SnapshotDraft,
    SnapshotFilter, SnapshotId, SnapshotStatus, SnapshotStore, SnapshotSummary, ValidationReport,
};

// Re-export lineage types
pub use lineage::{
    DriftReport, InstanceEntry, InstanceId, InstanceStatus, LineageEngine, ReconciliationReport,
    SpawnedInstance,
};

// Re-export audit types
pub use audit::{AuditEntry, AuditLog, AuditOutcome, ChainVerification, EventId};

// Re-export resurrection types
pub use resurrection::{
    ReceiptId, ResurrectionEngine, ResurrectionOutcome, ResurrectionReceipt, ResurrectionRequest,
    ResurrectionState,
};

// Re-export ingestion types
pub use ingest::{
    CancellationToken, CheckpointStatus, EmbeddingProvider, HashingEmbedder, ImportVerification,
    IngestMessage, IngestPipeline, IngestReport,
};

// Re-export signer types
pub use crypto::{SignerAnchor, SignerId};
