//! Storage layer for snapshots, import batches, checkpoints, the anchor
//! registry, and resurrection receipts.
//!
//! # Directory layout
//!
//! By convention the default root is `~/.agentic/continuity/`, with
//! sub-directories created by each store:
//!
//! ```text
//! ~/.agentic/continuity/
//! ├── config.json
//! ├── snapshots/
//! │   └── {snapshot_id}.json
//! ├── imports/
//! │   └── {source_id}/batch-{index:08}.json
//! ├── checkpoints/
//! │   └── {source_id}.json
//! ├── receipts/
//! │   └── {receipt_id}.json
//! ├── registry/
//! │   └── anchors.json
//! └── audit/
//!     ├── audit.jsonl
//!     └── archive/segment-{n:06}.jsonl
//! ```
//!
//! # Modules
//!
//! - [`fsutil`] — staged writes, retries with backoff, advisory lock files.
//! - [`lock`] — per-subject in-process writer locks.
//! - [`snapshot_files`] — snapshot documents and their status wrapper.
//! - [`import_files`] — committed import batches.
//! - [`checkpoint_store`] — import checkpoints.
//! - [`registry_store`] — the anchor registry document.
//! - [`receipt_store`] — resurrection receipts.

pub mod checkpoint_store;
pub mod fsutil;
pub mod import_files;
pub mod lock;
pub mod receipt_store;
pub mod registry_store;
pub mod snapshot_files;

pub use checkpoint_store::CheckpointStore;
pub use import_files::{check_source_id, ImportFiles};
pub use lock::{SubjectLock, SubjectLocks};
pub use receipt_store::ReceiptStore;
pub use registry_store::RegistryStore;
pub use snapshot_files::{SnapshotFile, SnapshotFiles};

/// Sub-directory names under the storage root.
pub mod layout {
    pub const SNAPSHOTS: &str = "snapshots";
    pub const IMPORTS: &str = "imports";
    pub const CHECKPOINTS: &str = "checkpoints";
    pub const RECEIPTS: &str = "receipts";
    pub const REGISTRY: &str = "registry";
    pub const AUDIT: &str = "audit";
}
