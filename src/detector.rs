//! Content-addressed change detection over a codebase tree
//!
//! Computes the tri-partition `{added, modified, removed}` between on-disk
//! state and the persisted [`HashStore`]. Two modes: a full scan that
//! rehashes every non-ignored file (mtime cache skips unchanged ones), and
//! an incremental scan that uses mtime pre-filtering and falls back to a
//! full scan on a configurable interval or on first run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use rayon::prelude::*;
use thiserror::Error;

use crate::hash_store::{hash_file, HashStore, HashStoreError};
use crate::ignore_rules::IgnoreMatcher;

/// Files larger than this are skipped entirely.
pub const MAX_FILE_SIZE: u64 = 1_048_576;

/// Full scan is forced after this much time without one.
pub const DEFAULT_FULL_SCAN_INTERVAL: Duration = Duration::from_millis(300_000);

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Snapshot(#[from] HashStoreError),
}

/// A file pending insertion or update, with its freshly computed hash.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub path: String,
    pub hash: String,
    pub mtime_ms: i64,
}

/// Result of a scan: the authoritative change set plus bookkeeping the
/// caller applies at commit time.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub added: Vec<PendingFile>,
    pub modified: Vec<PendingFile>,
    pub removed: Vec<String>,
    /// Files whose mtime changed but whose content did not; the mtime
    /// cache is refreshed silently at commit.
    pub touched: Vec<PendingFile>,
    /// True when this change set came from a full rehash, so the caller
    /// records a new full-scan timestamp on commit.
    pub from_full_scan: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

/// Outcome of a single-file probe.
#[derive(Debug)]
pub enum FileAction {
    Added(PendingFile),
    Modified(PendingFile),
    Removed(String),
    Noop,
}

impl FileAction {
    pub fn name(&self) -> &'static str {
        match self {
            FileAction::Added(_) => "added",
            FileAction::Modified(_) => "modified",
            FileAction::Removed(_) => "removed",
            FileAction::Noop => "noop",
        }
    }
}

/// Path-level diff between two stores (classification only).
#[derive(Debug, Default, PartialEq)]
pub struct StoreDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

pub struct ChangeDetector {
    root: PathBuf,
    store: HashStore,
    matcher: IgnoreMatcher,
    full_scan_interval: Duration,
    max_file_size: u64,
}

impl ChangeDetector {
    pub fn new(root: &Path, store: HashStore, matcher: IgnoreMatcher) -> Self {
        Self {
            root: root.to_path_buf(),
            store,
            matcher,
            full_scan_interval: DEFAULT_FULL_SCAN_INTERVAL,
            max_file_size: MAX_FILE_SIZE,
        }
    }

    pub fn with_full_scan_interval(mut self, interval: Duration) -> Self {
        self.full_scan_interval = interval;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn store(&self) -> &HashStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut HashStore {
        &mut self.store
    }

    pub fn matcher(&self) -> &IgnoreMatcher {
        &self.matcher
    }

    pub fn set_matcher(&mut self, matcher: IgnoreMatcher) {
        self.matcher = matcher;
    }

    /// Walk the tree and rehash every non-ignored regular file, reusing the
    /// stored hash when the cached mtime matches. Does not mutate the
    /// store; the caller applies the returned changes.
    pub fn full_scan(&self) -> Result<ChangeSet, DetectorError> {
        let entries = self.walk();

        // Partition into reusable entries and candidates needing a rehash.
        let mut prospective: BTreeMap<String, (String, i64)> = BTreeMap::new();
        let mut candidates: Vec<(String, PathBuf, i64)> = Vec::new();
        for (rel, abs, mtime_ms) in entries {
            match (self.store.get(&rel), self.store.mtime(&rel)) {
                (Some(hash), Some(cached)) if cached == mtime_ms => {
                    prospective.insert(rel, (hash.to_string(), mtime_ms));
                }
                _ => candidates.push((rel, abs, mtime_ms)),
            }
        }

        let hashed: Vec<(String, Option<String>, i64)> = candidates
            .into_par_iter()
            .map(|(rel, abs, mtime_ms)| match hash_file(&abs) {
                Ok(hash) => (rel, Some(hash), mtime_ms),
                Err(e) => {
                    tracing::warn!(path = %abs.display(), error = %e, "Failed to hash file, skipping");
                    (rel, None, mtime_ms)
                }
            })
            .collect();

        for (rel, hash, mtime_ms) in hashed {
            match hash {
                Some(h) => {
                    prospective.insert(rel, (h, mtime_ms));
                }
                // Unreadable: keep the stored entry so the file is not
                // misreported as removed.
                None => {
                    if let (Some(h), Some(m)) = (self.store.get(&rel), self.store.mtime(&rel)) {
                        prospective.insert(rel, (h.to_string(), m));
                    }
                }
            }
        }

        let mut changes = self.diff_prospective(&prospective);
        changes.from_full_scan = true;
        Ok(changes)
    }

    /// Mtime-prefiltered scan. Delegates to [`full_scan`] on first run or
    /// when the last full scan is older than the configured interval.
    ///
    /// [`full_scan`]: ChangeDetector::full_scan
    pub fn incremental_scan(&self) -> Result<ChangeSet, DetectorError> {
        let last = self.store.last_full_scan_ms();
        if last == 0 || self.full_scan_due(last) {
            tracing::debug!(root = %self.root.display(), "Incremental scan delegating to full scan");
            return self.full_scan();
        }

        let entries = self.walk();
        let mut changes = ChangeSet::default();
        let mut seen: Vec<String> = Vec::with_capacity(entries.len());
        let mut candidates: Vec<(String, PathBuf, i64)> = Vec::new();

        for (rel, abs, mtime_ms) in entries {
            seen.push(rel.clone());
            if self.store.mtime(&rel) != Some(mtime_ms) {
                candidates.push((rel, abs, mtime_ms));
            }
        }

        let hashed: Vec<(String, Option<String>, i64)> = candidates
            .into_par_iter()
            .map(|(rel, abs, mtime_ms)| match hash_file(&abs) {
                Ok(hash) => (rel, Some(hash), mtime_ms),
                Err(e) => {
                    tracing::warn!(path = %abs.display(), error = %e, "Failed to hash candidate, skipping");
                    (rel, None, mtime_ms)
                }
            })
            .collect();

        for (rel, hash, mtime_ms) in hashed {
            let Some(hash) = hash else { continue };
            let pending = PendingFile {
                path: rel.clone(),
                hash: hash.clone(),
                mtime_ms,
            };
            match self.store.get(&rel) {
                None => changes.added.push(pending),
                Some(old) if old != hash => changes.modified.push(pending),
                Some(_) => changes.touched.push(pending),
            }
        }

        let seen: std::collections::HashSet<&str> = seen.iter().map(|s| s.as_str()).collect();
        for path in self.store.paths() {
            if !seen.contains(path) {
                changes.removed.push(path.to_string());
            }
        }

        Ok(changes)
    }

    /// Probe a single absolute path (watcher entry point).
    pub fn update_single_file(&self, absolute: &Path) -> Result<FileAction, DetectorError> {
        let rel = self.relative(absolute);

        let tracked = self.store.contains(&rel);
        let meta = std::fs::metadata(absolute).ok();
        let gone = meta
            .as_ref()
            .map(|m| !m.is_file() || m.len() > self.max_file_size)
            .unwrap_or(true);
        if gone || self.matcher.is_ignored(Path::new(&rel)) {
            return Ok(if tracked {
                FileAction::Removed(rel)
            } else {
                FileAction::Noop
            });
        }

        let mtime_ms = meta.map(mtime_millis).unwrap_or(0);
        let hash = hash_file(absolute)?;
        let pending = PendingFile {
            path: rel.clone(),
            hash: hash.clone(),
            mtime_ms,
        };
        match self.store.get(&rel) {
            None => Ok(FileAction::Added(pending)),
            Some(old) if old != hash => Ok(FileAction::Modified(pending)),
            Some(_) => Ok(FileAction::Noop),
        }
    }

    /// Classify every path that differs between two stores. The Merkle root
    /// short-circuits the common "nothing changed" case.
    pub fn compare(a: &mut HashStore, b: &mut HashStore) -> StoreDiff {
        if a.merkle_root() == b.merkle_root() {
            return StoreDiff::default();
        }
        let mut diff = StoreDiff::default();
        for (path, hash) in a.iter() {
            match b.get(path) {
                None => diff.removed.push(path.to_string()),
                Some(other) if other != hash => diff.modified.push(path.to_string()),
                Some(_) => {}
            }
        }
        for (path, _) in b.iter() {
            if !a.contains(path) {
                diff.added.push(path.to_string());
            }
        }
        diff
    }

    fn full_scan_due(&self, last_ms: i64) -> bool {
        let now_ms = epoch_millis();
        now_ms.saturating_sub(last_ms) as u128 > self.full_scan_interval.as_millis()
    }

    fn diff_prospective(&self, prospective: &BTreeMap<String, (String, i64)>) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for (path, (hash, mtime_ms)) in prospective {
            let pending = PendingFile {
                path: path.clone(),
                hash: hash.clone(),
                mtime_ms: *mtime_ms,
            };
            match self.store.get(path) {
                None => changes.added.push(pending),
                Some(old) if old != hash => changes.modified.push(pending),
                Some(_) => {
                    if self.store.mtime(path) != Some(*mtime_ms) {
                        changes.touched.push(pending);
                    }
                }
            }
        }
        for path in self.store.paths() {
            if !prospective.contains_key(path) {
                changes.removed.push(path.to_string());
            }
        }
        changes
    }

    /// Enumerate non-ignored regular files as `(relative, absolute, mtime)`.
    /// Per-entry failures are logged and skipped; sibling entries survive.
    fn walk(&self) -> Vec<(String, PathBuf, i64)> {
        let walker = ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .follow_links(false)
            .build();

        let mut out = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to read directory entry during walk");
                    continue;
                }
            };
            let is_file = entry.file_type().map(|ft| ft.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Failed to stat file, skipping");
                    continue;
                }
            };
            if meta.len() > self.max_file_size {
                tracing::debug!(path = %entry.path().display(), size = meta.len(), "Skipping large file");
                continue;
            }
            let rel = self.relative(entry.path());
            if rel.is_empty() || self.matcher.is_ignored(Path::new(&rel)) {
                continue;
            }
            out.push((rel, entry.path().to_path_buf(), mtime_millis(meta)));
        }
        out
    }

    /// POSIX-style relative path (forward slashes) from the OS-native form.
    fn relative(&self, absolute: &Path) -> String {
        let rel = absolute.strip_prefix(&self.root).unwrap_or(absolute);
        rel.to_string_lossy().replace('\\', "/")
    }
}

fn mtime_millis(meta: std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
