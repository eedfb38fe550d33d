//! Filesystem helpers: atomic writes, bounded retries, advisory lock files.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::config::StorageConfig;
use crate::error::{ContinuityError, Result};

/// Write `data` to a uniquely named sibling temp file and fsync it.
///
/// Returns the temp path; nothing is visible at `path` until
/// [`commit_staged`] renames it into place.
pub fn stage(path: &Path, data: &[u8]) -> Result<PathBuf> {
    stage_with(path, data, false)
}

fn stage_with(path: &Path, data: &[u8], owner_only: bool) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let suffix = hex::encode(crate::crypto::random::random_bytes::<6>());
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.{suffix}.tmp"));

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    if owner_only {
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
    }
    let mut file = options.open(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(tmp_path)
}

/// Rename a staged temp file into its final place.
pub fn commit_staged(tmp_path: &Path, path: &Path) -> Result<()> {
    std::fs::rename(tmp_path, path)?;
    Ok(())
}

/// Remove a staged temp file, ignoring "already gone".
pub fn discard_staged(tmp_path: &Path) {
    if let Err(e) = std::fs::remove_file(tmp_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("failed to discard staged file {}: {e}", tmp_path.display());
        }
    }
}

/// Write a file atomically: a concurrent reader never sees a partial write.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = stage(path, data)?;
    if let Err(e) = commit_staged(&tmp, path) {
        discard_staged(&tmp);
        return Err(e);
    }
    Ok(())
}

/// [`write_atomic`] for secrets: on unix the file is created readable and
/// writable by its owner only.
pub fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = stage_with(path, data, true)?;
    if let Err(e) = commit_staged(&tmp, path) {
        discard_staged(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Run `op` until it succeeds or `config.io_retries` retries are used up,
/// sleeping with exponential backoff in between.
///
/// Typed domain errors (validation, integrity, ...) are returned at once;
/// only storage-medium failures are retried.
pub fn with_retry<T>(
    config: &StorageConfig,
    what: &str,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && attempt < config.io_retries => {
                let wait = config.backoff(attempt);
                log::warn!(
                    "{what} failed (attempt {}/{}): {e}; retrying in {wait:?}",
                    attempt + 1,
                    config.io_retries + 1
                );
                std::thread::sleep(wait);
                attempt += 1;
            }
            Err(e) => return Err(e.into_persistence()),
        }
    }
}

fn is_retryable(err: &ContinuityError) -> bool {
    matches!(
        err,
        ContinuityError::Io(_) | ContinuityError::Persistence(_) | ContinuityError::Serialization(_)
    )
}

// ── Advisory lock files ───────────────────────────────────────────────────────

/// Cross-process advisory lock held as an exclusively created lock file.
///
/// The file is removed on drop. Lock files older than
/// `StorageConfig::stale_lock_ms` are treated as abandoned by a crashed
/// holder and broken.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquire the lock at `path`, waiting at most `lock_timeout_ms`.
    pub fn acquire(path: &Path, config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let deadline = Instant::now() + Duration::from_millis(config.lock_timeout_ms);
        let stale_after = Duration::from_millis(config.stale_lock_ms);
        let mut wait = Duration::from_millis(1);

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_age(path).is_some_and(|age| age > stale_after) {
                        log::warn!("breaking stale lock {}", path.display());
                        let _ = std::fs::remove_file(path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(ContinuityError::Persistence(format!(
                            "timed out after {} ms waiting for lock {}",
                            config.lock_timeout_ms,
                            path.display()
                        )));
                    }
                    std::thread::sleep(wait);
                    wait = (wait * 2).min(Duration::from_millis(50));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("failed to release lock {}: {e}", self.path.display());
        }
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}
