//! Per-output failure counting.
//!
//! The tracker is the only state mutated by every worker and by the
//! stale-error purge, so the map lives behind a single mutex and is never
//! handed out. Each public method is one critical section; in particular the
//! ceiling check used by workers ([`ErrorTracker::take_if_exceeded`]) reads
//! and removes under the same lock so two workers cannot both act on one
//! exhausted record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Failure history for one output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub key: PathBuf,
    pub tries: u32,
    pub last_error: Option<String>,
}

/// Process-wide, thread-safe table of [`ErrorRecord`]s keyed by output path.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    records: Mutex<HashMap<PathBuf, ErrorRecord>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a record half-written
    // (every mutation is a single insert/remove), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, ErrorRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Current failure count for `key`, if any failure is recorded.
    pub fn get(&self, key: &Path) -> Option<u32> {
        self.lock().get(key).map(|r| r.tries)
    }

    /// Full record for `key`.
    pub fn record(&self, key: &Path) -> Option<ErrorRecord> {
        self.lock().get(key).cloned()
    }

    /// Count one more failure for `key` and return the new total.
    pub fn increment(&self, key: &Path, error: Option<String>) -> u32 {
        let mut records = self.lock();
        let record = records
            .entry(key.to_path_buf())
            .or_insert_with(|| ErrorRecord {
                key: key.to_path_buf(),
                tries: 0,
                last_error: None,
            });
        record.tries = record.tries.saturating_add(1);
        if error.is_some() {
            record.last_error = error;
        }
        debug!("Error count for {} is now {}", key.display(), record.tries);
        record.tries
    }

    /// Forget `key`. Returns the removed record.
    pub fn clear(&self, key: &Path) -> Option<ErrorRecord> {
        let removed = self.lock().remove(key);
        if removed.is_some() {
            debug!("Cleared error record for {}", key.display());
        }
        removed
    }

    /// Remove and return the record for `key` if its count exceeds `ceiling`.
    ///
    /// Only the caller that receives `Some` may apply the ceiling policy.
    pub fn take_if_exceeded(&self, key: &Path, ceiling: u32) -> Option<ErrorRecord> {
        let mut records = self.lock();
        match records.get(key) {
            Some(r) if r.tries > ceiling => records.remove(key),
            _ => None,
        }
    }

    /// Whether the count for `key` exceeds `ceiling`.
    pub fn exceeded(&self, key: &Path, ceiling: u32) -> bool {
        self.get(key).is_some_and(|tries| tries > ceiling)
    }

    /// Number of outputs with a recorded failure.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
