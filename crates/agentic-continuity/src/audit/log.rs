//! File-backed audit log — one JSON line per entry, append-only.
//!
//! ```text
//! {dir}/
//! ├── audit.jsonl              active segment, appended to
//! ├── audit.lock               advisory lock while appending/archiving
//! └── archive/
//!     ├── segment-{n:06}.jsonl cold segments, oldest first
//!     └── pending-archive.json present only while an archive is in flight
//! ```
//!
//! Two chains are maintained. Every entry links to the previous line via
//! `previous_entry_hash`, and within a subject each entry's
//! `prior_state_hash` equals the subject's previous `new_state_hash`.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::canonical::{derive_id, GENESIS_HASH};
use crate::config::StorageConfig;
use crate::error::{ContinuityError, Result};
use crate::storage::fsutil::{write_atomic, LockFile};

use super::types::*;

const ACTIVE_FILE: &str = "audit.jsonl";
const LOCK_FILE: &str = "audit.lock";
const ARCHIVE_DIR: &str = "archive";
const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".jsonl";
const PENDING_MARKER: &str = "pending-archive.json";

/// Written before a segment is cut so an interrupted archive can be
/// completed by the next lock holder.
#[derive(Debug, Serialize, Deserialize)]
struct PendingArchive {
    segment: String,
    /// Sequence of the newest entry copied into `segment`.
    last_sequence: u64,
}

// ── Chain state ───────────────────────────────────────────────────────────────

/// Tip of both chains as of the last byte this process has read.
#[derive(Debug)]
struct ChainState {
    tips: HashMap<String, String>,
    last_entry_hash: String,
    next_sequence: u64,
    /// Bytes of the active segment already absorbed.
    known_len: u64,
    /// Cold segments present when the state was built. A change means the
    /// active file was rewritten by another handle.
    segments: usize,
}

impl ChainState {
    fn fresh() -> Self {
        Self {
            tips: HashMap::new(),
            last_entry_hash: GENESIS_HASH.to_string(),
            next_sequence: 0,
            known_len: 0,
            segments: 0,
        }
    }

    fn tip(&self, subject: &str) -> String {
        self.tips
            .get(subject)
            .cloned()
            .unwrap_or_else(|| GENESIS_HASH.to_string())
    }

    fn absorb(&mut self, entry: &AuditEntry) {
        self.tips
            .insert(entry.subject_id.clone(), entry.new_state_hash.clone());
        self.last_entry_hash = entry.entry_hash.clone();
        self.next_sequence = entry.sequence + 1;
    }
}

// ── AuditLog ──────────────────────────────────────────────────────────────────

/// Append-only, hash-chained audit log.
///
/// There is deliberately no API to delete or edit an entry. Appends from
/// several processes are coordinated through the advisory lock file; each
/// appender first absorbs whatever other processes wrote.
pub struct AuditLog {
    active_path: PathBuf,
    archive_dir: PathBuf,
    lock_path: PathBuf,
    storage: StorageConfig,
    state: Mutex<ChainState>,
}

impl AuditLog {
    /// Open (or create) the log rooted at `dir` and replay it to find the
    /// current chain tips.
    pub fn open(dir: impl Into<PathBuf>, storage: StorageConfig) -> Result<Self> {
        let dir = dir.into();
        let archive_dir = dir.join(ARCHIVE_DIR);
        std::fs::create_dir_all(&archive_dir)?;

        let log = Self {
            active_path: dir.join(ACTIVE_FILE),
            archive_dir,
            lock_path: dir.join(LOCK_FILE),
            storage,
            state: Mutex::new(ChainState::fresh()),
        };
        {
            let mut state = log.lock_state();
            if log.archive_dir.join(PENDING_MARKER).exists() {
                let _lock = LockFile::acquire(&log.lock_path, &log.storage)
                    .map_err(ContinuityError::into_persistence)?;
                log.finish_pending_archive()?;
            }
            log.rebuild(&mut state)?;
        }
        Ok(log)
    }

    /// Path of the active segment.
    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    /// Append one entry and return its id.
    ///
    /// Fails with `Integrity` when `prior_state_hash` is not the subject's
    /// current tip, and with `Persistence` when the entry could not be
    /// durably written. On any error nothing is appended.
    pub fn append(&self, record: AuditRecord) -> Result<EventId> {
        let mut state = self.lock_state();
        let _lock = LockFile::acquire(&self.lock_path, &self.storage)
            .map_err(ContinuityError::into_persistence)?;
        self.recover_and_catch_up(&mut state)
            .map_err(ContinuityError::into_persistence)?;

        let tip = state.tip(&record.subject_id);
        if record.prior_state_hash != tip {
            return Err(ContinuityError::Integrity {
                subject: record.subject_id,
                expected: tip,
                actual: record.prior_state_hash,
            });
        }

        let timestamp = crate::time::now_micros();
        let sequence = state.next_sequence;
        let event_id = EventId(derive_id(
            "aevt",
            &format!(
                "{}:{}:{}:{}",
                record.subject_id, sequence, timestamp, state.last_entry_hash
            ),
        ));

        let mut entry = AuditEntry {
            event_id,
            sequence,
            timestamp,
            event_type: record.event_type,
            subject_id: record.subject_id,
            actor_id: record.actor_id,
            prior_state_hash: record.prior_state_hash,
            new_state_hash: record.new_state_hash,
            outcome: record.outcome,
            metadata: record.metadata,
            previous_entry_hash: state.last_entry_hash.clone(),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash()?;

        let mut line = serde_json::to_string(&entry)
            .map_err(|e| ContinuityError::Persistence(e.to_string()))?;
        line.push('\n');
        self.write_line(&line)
            .map_err(ContinuityError::into_persistence)?;

        state.absorb(&entry);
        state.known_len += line.len() as u64;

        log::debug!(
            "audit {} #{} {} {} -> {}",
            entry.event_type,
            entry.sequence,
            entry.subject_id,
            entry.outcome.as_tag(),
            entry.event_id
        );
        Ok(entry.event_id)
    }

    /// Current state hash of `subject` (genesis if it has no entries).
    pub fn subject_tip(&self, subject: &str) -> Result<String> {
        let mut state = self.lock_state();
        self.catch_up(&mut state)?;
        Ok(state.tip(subject))
    }

    /// Lazily iterate entries oldest-first, optionally for one subject.
    ///
    /// Every call starts a fresh pass over cold segments then the active
    /// segment, so the sequence is restartable.
    pub fn iter(&self, subject: Option<&str>) -> Result<AuditIter> {
        let mut pending: VecDeque<PathBuf> = self.segment_paths()?.into();
        pending.push_back(self.active_path.clone());
        Ok(AuditIter {
            pending,
            current: None,
            subject: subject.map(str::to_string),
        })
    }

    /// Collect a subject's entries (or all entries) into memory.
    pub fn entries(&self, subject: Option<&str>) -> Result<Vec<AuditEntry>> {
        self.iter(subject)?.collect()
    }

    /// Replay the log and check both chains.
    ///
    /// With a subject, per-entry breaks are reported only for that subject,
    /// while line-link breaks are reported wherever they occur: a removed
    /// line can hide any subject's history.
    pub fn verify_chain(&self, subject: Option<&str>) -> Result<ChainVerification> {
        let mut previous_hash = GENESIS_HASH.to_string();
        let mut expected_sequence = 0u64;
        let mut tips: HashMap<String, String> = HashMap::new();
        let mut breaks = Vec::new();
        let mut entries_checked = 0u64;

        for (position, item) in self.iter(None)?.enumerate() {
            let position = position as u64;
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    breaks.push(ChainBreak {
                        position,
                        event_id: None,
                        subject_id: None,
                        reason: format!("unreadable entry: {e}"),
                    });
                    continue;
                }
            };

            let in_scope = subject.map_or(true, |s| s == entry.subject_id);
            let mut push = |reason: String| {
                breaks.push(ChainBreak {
                    position,
                    event_id: Some(entry.event_id.clone()),
                    subject_id: Some(entry.subject_id.clone()),
                    reason,
                })
            };

            if entry.previous_entry_hash != previous_hash {
                push("previous entry hash does not link to the preceding line".to_string());
            }
            if entry.sequence != expected_sequence {
                push(format!(
                    "sequence {} where {} expected",
                    entry.sequence, expected_sequence
                ));
            }
            if in_scope {
                entries_checked += 1;
                match entry.compute_hash() {
                    Ok(hash) if hash == entry.entry_hash => {}
                    Ok(hash) => push(format!(
                        "entry hash mismatch: stored {}, recomputed {hash}",
                        entry.entry_hash
                    )),
                    Err(e) => push(format!("entry hash not computable: {e}")),
                }
                let tip = tips
                    .get(&entry.subject_id)
                    .map(String::as_str)
                    .unwrap_or(GENESIS_HASH);
                if entry.prior_state_hash != tip {
                    push(format!(
                        "prior state hash {} does not match subject tip {tip}",
                        entry.prior_state_hash
                    ));
                }
            }

            previous_hash = entry.entry_hash.clone();
            expected_sequence = entry.sequence + 1;
            tips.insert(entry.subject_id.clone(), entry.new_state_hash.clone());
        }

        Ok(ChainVerification {
            ok: breaks.is_empty(),
            entries_checked,
            breaks,
        })
    }

    /// Relocate all but the newest `keep_recent` entries into a new cold
    /// segment. Order is preserved and the entries stay readable via
    /// [`AuditLog::iter`]; nothing is ever dropped.
    pub fn archive(&self, keep_recent: usize) -> Result<ArchiveReport> {
        let mut state = self.lock_state();
        let _lock = LockFile::acquire(&self.lock_path, &self.storage)
            .map_err(ContinuityError::into_persistence)?;
        self.recover_and_catch_up(&mut state)?;

        let content = match std::fs::read_to_string(&self.active_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let complete = lines.iter().filter(|l| l.ends_with('\n')).count();

        if complete <= keep_recent {
            return Ok(ArchiveReport {
                segment: None,
                relocated: 0,
                remaining: complete as u64,
            });
        }

        let split = complete - keep_recent;
        let cold: String = lines[..split].concat();
        let hot: String = lines[split..].concat();
        let last_sequence = serde_json::from_str::<AuditEntry>(lines[split - 1].trim_end())
            .map_err(|e| {
                ContinuityError::InvalidFileFormat(format!("cannot archive past malformed line: {e}"))
            })?
            .sequence;

        let name = format!("{SEGMENT_PREFIX}{:06}{SEGMENT_SUFFIX}", self.next_segment_number()?);
        let segment = self.archive_dir.join(&name);
        let marker = self.archive_dir.join(PENDING_MARKER);
        let pending = PendingArchive {
            segment: name,
            last_sequence,
        };
        let marker_bytes = serde_json::to_vec(&pending)
            .map_err(|e| ContinuityError::Serialization(e.to_string()))?;
        write_atomic(&marker, &marker_bytes)?;
        write_atomic(&segment, cold.as_bytes())?;
        mark_read_only(&segment);
        write_atomic(&self.active_path, hot.as_bytes())?;
        std::fs::remove_file(&marker)?;
        state.known_len = hot.len() as u64;
        state.segments = self.segment_paths()?.len();

        log::info!(
            "archived {split} audit entries to {}, {keep_recent} kept active",
            segment.display()
        );
        Ok(ArchiveReport {
            segment: Some(segment),
            relocated: split as u64,
            remaining: keep_recent as u64,
        })
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn lock_state(&self) -> MutexGuard<'_, ChainState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.active_path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Replay every segment from scratch.
    fn rebuild(&self, state: &mut ChainState) -> Result<()> {
        *state = ChainState::fresh();
        let segments = self.segment_paths()?;
        state.segments = segments.len();
        for segment in segments {
            let (entries, _) = read_complete_lines(&segment, 0)?;
            entries.iter().for_each(|e| state.absorb(e));
        }
        let (entries, consumed) = read_complete_lines(&self.active_path, 0)?;
        entries.iter().for_each(|e| state.absorb(e));
        state.known_len = consumed;
        Ok(())
    }

    /// Absorb lines appended (or an archive performed) by another process.
    fn catch_up(&self, state: &mut ChainState) -> Result<()> {
        let len = match std::fs::metadata(&self.active_path) {
            Ok(meta) if meta.is_dir() => {
                return Err(ContinuityError::Persistence(format!(
                    "audit log path {} is not a file",
                    self.active_path.display()
                )))
            }
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        if len < state.known_len || self.segment_paths()?.len() != state.segments {
            return self.rebuild(state);
        }
        if len > state.known_len {
            let (entries, consumed) = read_complete_lines(&self.active_path, state.known_len)?;
            // The file was replaced underneath the cached offset.
            if entries
                .first()
                .is_some_and(|e| e.previous_entry_hash != state.last_entry_hash)
            {
                log::debug!("audit log rewritten by another handle, replaying");
                return self.rebuild(state);
            }
            entries.iter().for_each(|e| state.absorb(e));
            state.known_len = consumed;
        }
        Ok(())
    }

    /// Lock holders only: finish any interrupted archive, then absorb new lines.
    fn recover_and_catch_up(&self, state: &mut ChainState) -> Result<()> {
        if self.finish_pending_archive()? {
            return self.rebuild(state);
        }
        self.catch_up(state)
    }

    /// Complete an archive that stopped between cutting its segment and
    /// rewriting the active file. Returns whether anything was pending.
    fn finish_pending_archive(&self) -> Result<bool> {
        let marker = self.archive_dir.join(PENDING_MARKER);
        let raw = match std::fs::read(&marker) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let pending: PendingArchive = serde_json::from_slice(&raw).map_err(|e| {
            ContinuityError::InvalidFileFormat(format!("unreadable archive marker: {e}"))
        })?;

        // Without the segment the active file was never touched.
        if self.archive_dir.join(&pending.segment).exists() {
            let content = match std::fs::read_to_string(&self.active_path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(e.into()),
            };
            let mut lines = content.split_inclusive('\n').peekable();
            let mut dropped = 0usize;
            while let Some(line) = lines.peek() {
                match serde_json::from_str::<AuditEntry>(line.trim_end()) {
                    Ok(entry) if entry.sequence <= pending.last_sequence => {
                        lines.next();
                        dropped += 1;
                    }
                    _ => break,
                }
            }
            if dropped > 0 {
                let hot: String = lines.collect();
                write_atomic(&self.active_path, hot.as_bytes())?;
            }
            log::warn!(
                "completed interrupted audit archive {}: {dropped} duplicated entries removed from the active file",
                pending.segment
            );
        }
        std::fs::remove_file(&marker)?;
        Ok(true)
    }

    fn segment_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.archive_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(SEGMENT_PREFIX) && name.ends_with(SEGMENT_SUFFIX) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn next_segment_number(&self) -> Result<u64> {
        let max = self
            .segment_paths()?
            .iter()
            .filter_map(|p| {
                let name = p.file_name()?.to_string_lossy().into_owned();
                name.strip_prefix(SEGMENT_PREFIX)?
                    .strip_suffix(SEGMENT_SUFFIX)?
                    .parse::<u64>()
                    .ok()
            })
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }
}

/// Read newline-terminated lines from `offset`, returning the parsed
/// entries and the offset just past the last complete line. Unparsable
/// lines are skipped here and reported by `verify_chain`.
fn read_complete_lines(path: &Path, offset: u64) -> Result<(Vec<AuditEntry>, u64)> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e.into()),
    };
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let complete_len = buf.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
    let mut entries = Vec::new();
    for raw in buf[..complete_len].split(|&b| b == b'\n') {
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<AuditEntry>(raw) {
            Ok(entry) => entries.push(entry),
            Err(e) => log::warn!("skipping unparsable audit line in {}: {e}", path.display()),
        }
    }
    Ok((entries, offset + complete_len as u64))
}

fn mark_read_only(path: &Path) {
    if let Ok(meta) = std::fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_readonly(true);
        let _ = std::fs::set_permissions(path, perms);
    }
}

// ── AuditIter ─────────────────────────────────────────────────────────────────

/// Lazy, oldest-first pass over all segments.
pub struct AuditIter {
    pending: VecDeque<PathBuf>,
    current: Option<Lines<BufReader<File>>>,
    subject: Option<String>,
}

impl Iterator for AuditIter {
    type Item = Result<AuditEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let path = self.pending.pop_front()?;
                match File::open(&path) {
                    Ok(file) => self.current = Some(BufReader::new(file).lines()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Some(Err(e.into())),
                }
                continue;
            }
            let next = self.current.as_mut().and_then(|lines| lines.next());

            match next {
                None => self.current = None,
                Some(Err(e)) => {
                    self.current = None;
                    return Some(Err(e.into()));
                }
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => {
                    let entry = match serde_json::from_str::<AuditEntry>(&line) {
                        Ok(entry) => entry,
                        Err(e) => {
                            return Some(Err(ContinuityError::InvalidFileFormat(format!(
                                "malformed audit line: {e}"
                            ))))
                        }
                    };
                    if self
                        .subject
                        .as_deref()
                        .map_or(true, |s| s == entry.subject_id)
                    {
                        return Some(Ok(entry));
                    }
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
