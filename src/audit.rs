//! Per-codebase sync audit history
//!
//! Every completed sync appends one entry; the ring keeps the most recent
//! fifty per codebase.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Ring capacity per codebase.
pub const AUDIT_RING_CAPACITY: usize = 50;

/// What initiated a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncTrigger {
    Manual,
    Realtime,
    Scheduled,
    PreSearch,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub trigger: SyncTrigger,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub duration_ms: u64,
}

/// Bounded ring of audit entries, newest last.
#[derive(Default)]
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        operation: &str,
        trigger: SyncTrigger,
        (added, modified, removed): (usize, usize, usize),
        duration_ms: u64,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            trigger,
            added,
            modified,
            removed,
            duration_ms,
        };
        let mut entries = self.lock();
        if entries.len() == AUDIT_RING_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
