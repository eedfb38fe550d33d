//! Lineage & drift — labeled instances under an anchor key and a normalized
//! divergence score between snapshots.
//!
//! Divergence is only reported. Nothing here merges or resolves instances.

pub mod drift;
pub mod engine;
pub mod types;

pub use drift::drift_score;
pub use engine::{anchor_subject, LineageEngine};
pub use types::{
    AnchorRegistry, DriftReport, FlaggedInstance, InstanceEntry, InstanceId, InstanceStatus,
    ReconciliationReport, SpawnedInstance,
};
