//! Top-level handle wiring every component onto one storage root.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audit::AuditLog;
use crate::config::ContinuityConfig;
use crate::error::Result;
use crate::ingest::{EmbeddingProvider, HashingEmbedder, IngestPipeline};
use crate::lineage::LineageEngine;
use crate::resurrection::ResurrectionEngine;
use crate::sandbox::Sandbox;
use crate::snapshot::SnapshotStore;
use crate::storage::{layout, CheckpointStore, ReceiptStore, RegistryStore, SubjectLocks};

/// All components of one continuity root, sharing an audit log and a
/// per-subject lock table.
pub struct Continuity {
    root: PathBuf,
    config: ContinuityConfig,
    snapshots: Arc<SnapshotStore>,
    lineage: LineageEngine,
    resurrection: ResurrectionEngine,
    ingest: IngestPipeline,
}

impl Continuity {
    /// Open `root` with the configuration found in `{root}/config.json`.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let config = ContinuityConfig::load(root.as_ref())?;
        Self::open(root, config)
    }

    /// Open `root` with the built-in hashing embedder.
    pub fn open(root: impl AsRef<Path>, config: ContinuityConfig) -> Result<Self> {
        let embedder = Arc::new(HashingEmbedder::new(config.ingest.embedding_dimension)?);
        Self::open_with_embedder(root, config, embedder)
    }

    pub fn open_with_embedder(
        root: impl AsRef<Path>,
        config: ContinuityConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let locks = Arc::new(SubjectLocks::new());
        let audit = Arc::new(AuditLog::open(
            root.join(layout::AUDIT),
            config.storage.clone(),
        )?);
        let snapshots = Arc::new(SnapshotStore::new(
            root.join(layout::SNAPSHOTS),
            root.join(layout::IMPORTS),
            audit,
            locks.clone(),
            config.storage.clone(),
        )?);

        let lineage = LineageEngine::new(
            RegistryStore::new(root.join(layout::REGISTRY), config.storage.clone())?,
            snapshots.clone(),
            locks.clone(),
            config.lineage.clone(),
            config.storage.clone(),
        );
        let resurrection = ResurrectionEngine::new(
            snapshots.clone(),
            ReceiptStore::new(root.join(layout::RECEIPTS))?,
            Sandbox::new(config.sandbox.clone()),
            locks,
        );
        let ingest = IngestPipeline::new(
            snapshots.clone(),
            CheckpointStore::new(root.join(layout::CHECKPOINTS))?,
            embedder,
            config.ingest.clone(),
            config.storage.clone(),
        );

        log::debug!("opened continuity root {}", root.display());
        Ok(Self {
            root,
            config,
            snapshots,
            lineage,
            resurrection,
            ingest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ContinuityConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditLog {
        self.snapshots.audit()
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn lineage(&self) -> &LineageEngine {
        &self.lineage
    }

    pub fn resurrection(&self) -> &ResurrectionEngine {
        &self.resurrection
    }

    pub fn ingest(&self) -> &IngestPipeline {
        &self.ingest
    }
}
