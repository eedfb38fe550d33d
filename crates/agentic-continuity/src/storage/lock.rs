//! Per-subject writer serialization.
//!
//! One mutex per subject (snapshot id, anchor key, import source, ...),
//! created on first use. Writers to distinct subjects never contend;
//! readers never take these locks.

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

/// Shared table of per-subject mutexes.
#[derive(Debug, Default)]
pub struct SubjectLocks {
    table: DashMap<String, Arc<Mutex<()>>>,
}

/// Handle to one subject's mutex. Call [`SubjectLock::lock`] to serialize.
#[derive(Debug, Clone)]
pub struct SubjectLock {
    inner: Arc<Mutex<()>>,
}

impl SubjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the mutex handle for `subject`, creating it if needed.
    pub fn handle(&self, subject: &str) -> SubjectLock {
        let inner = self
            .table
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SubjectLock { inner }
    }

    /// Number of subjects that have been locked at least once.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl SubjectLock {
    /// Block until this subject's writer slot is free.
    ///
    /// A writer that panicked while holding the lock leaves no partial state
    /// behind (every write is staged then renamed), so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
