//! Configuration for the continuity engine.
//!
//! Every knob has a default; `{root}/config.json` overrides any subset of
//! them. The root directory itself is resolved from `AGENTIC_CONTINUITY_HOME`
//! or falls back to `~/.agentic/continuity`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ContinuityError, Result};

/// Environment variable naming the storage root.
pub const HOME_ENV: &str = "AGENTIC_CONTINUITY_HOME";

/// File name of the optional config document inside the root.
pub const CONFIG_FILE: &str = "config.json";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuityConfig {
    pub lineage: LineageConfig,
    pub sandbox: SandboxConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
}

/// Lineage & drift settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    /// Instances whose drift index exceeds this value (0–10) are flagged.
    pub drift_threshold: u8,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self { drift_threshold: 3 }
    }
}

/// Recovery-routine sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Hard wall-clock limit for one routine.
    pub timeout_ms: u64,
    /// Maximum interpreted commands per run.
    pub max_steps: u64,
    /// Maximum bytes of emitted output.
    pub max_output_bytes: usize,
    /// Signer every snapshot must carry before resurrection, when set.
    pub expected_signer: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            max_steps: 10_000,
            max_output_bytes: 64 * 1024,
            expected_signer: None,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Storage I/O settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Retries after the first failed attempt of a retryable write.
    pub io_retries: u32,
    /// Base backoff; attempt `n` waits `io_backoff_ms * 2^n`.
    pub io_backoff_ms: u64,
    /// How long to wait for an advisory lock file before giving up.
    pub lock_timeout_ms: u64,
    /// Lock files older than this are considered abandoned.
    pub stale_lock_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            io_retries: 3,
            io_backoff_ms: 50,
            lock_timeout_ms: 5_000,
            stale_lock_ms: 30_000,
        }
    }
}

impl StorageConfig {
    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.io_backoff_ms.saturating_mul(factor))
    }
}

/// Batch ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    /// Upper bound on concurrent embedding calls.
    pub embedding_workers: usize,
    /// How many of the most recent batches `verify` re-fingerprints.
    pub spot_sample: usize,
    /// Dimension of the built-in hashing embedder.
    pub embedding_dimension: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            embedding_workers: 4,
            spot_sample: 3,
            embedding_dimension: 64,
        }
    }
}

impl ContinuityConfig {
    /// Load `{root}/config.json` if present, otherwise defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(&path)?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|e| {
            ContinuityError::InvalidFileFormat(format!(
                "failed to parse config {}: {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make components misbehave.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();
        if self.lineage.drift_threshold > 10 {
            violations.push(format!(
                "lineage.drift_threshold must be within 0..=10, got {}",
                self.lineage.drift_threshold
            ));
        }
        if self.ingest.batch_size == 0 {
            violations.push("ingest.batch_size must be positive".to_string());
        }
        if self.ingest.embedding_workers == 0 {
            violations.push("ingest.embedding_workers must be positive".to_string());
        }
        if self.ingest.embedding_dimension == 0 {
            violations.push("ingest.embedding_dimension must be positive".to_string());
        }
        if self.sandbox.timeout_ms == 0 {
            violations.push("sandbox.timeout_ms must be positive".to_string());
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ContinuityError::Validation { violations })
        }
    }
}

/// Resolve the storage root: explicit path, then `AGENTIC_CONTINUITY_HOME`,
/// then `~/.agentic/continuity`.
pub fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    let home = std::env::var("HOME")
        .map_err(|_| ContinuityError::NotFound("HOME is not set".to_string()))?;
    Ok(PathBuf::from(home).join(".agentic").join("continuity"))
}
