//! Single-writer sync orchestration per codebase
//!
//! Drives the three mutating workflows (full index, incremental reindex,
//! single-file update) against the change detector, the indexer, and the
//! vector store. At most one workflow runs per codebase at a time; the
//! controller holds the exclusive lock for the duration and owns the
//! audit log and the short-lived freshness cache.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::audit::{AuditLog, SyncTrigger};
use crate::detector::{epoch_millis, ChangeDetector, ChangeSet, DetectorError, FileAction};
use crate::hash_store::HashStoreError;
use crate::indexer::{ChunkBudget, Indexer, IndexerError};
use crate::registry::{CodebaseStatus, IndexOutcome, StatusBook};
use crate::store::{Filter, StoreError, VectorStore};

/// Rate limit for persisted progress snapshots during a full index.
const PROGRESS_PERSIST_INTERVAL: Duration = Duration::from_secs(1);

/// Advisory writer locks older than this are presumed stale.
const STALE_LOCK_AGE: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Snapshot(#[from] HashStoreError),
    #[error("Integrity violation: {0}")]
    Integrity(String),
    #[error("{0} file update(s) failed after retries")]
    FileUpdates(usize),
    #[error("Another indexer holds the writer lock: {0}")]
    Locked(String),
    #[error("Indexing cancelled")]
    Cancelled,
}

/// Tunables carried from configuration into the controller.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub chunk_budget: usize,
    pub freshness_ttl: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_budget: 450_000,
            freshness_ttl: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncCounts {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
}

impl SyncCounts {
    fn tuple(&self) -> (usize, usize, usize) {
        (self.added, self.modified, self.removed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    #[serde(flatten)]
    pub counts: SyncCounts,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SingleFileReport {
    pub action: &'static str,
    pub relative_path: String,
    pub duration_ms: u64,
}

/// Result of a completed full index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub indexed_files: usize,
    pub total_chunks: usize,
    pub failed_files: usize,
    pub outcome: IndexOutcome,
    pub duration_ms: u64,
}

/// Result of the pre-search freshness check.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FreshnessReport {
    pub had_changes: bool,
    pub changed_count: usize,
    pub duration_ms: u64,
    pub from_cache: bool,
}

struct SyncCacheEntry {
    at: Instant,
    had_changes: bool,
    changed_count: usize,
}

struct SyncInner {
    detector: ChangeDetector,
    indexer: Indexer,
}

pub struct SyncController {
    root: PathBuf,
    collection: String,
    inner: Mutex<SyncInner>,
    store: VectorStore,
    statuses: Arc<StatusBook>,
    pub audit: AuditLog,
    sync_cache: Mutex<Option<SyncCacheEntry>>,
    settings: SyncSettings,
    cancel: AtomicBool,
}

impl SyncController {
    pub fn new(
        root: &Path,
        collection: String,
        detector: ChangeDetector,
        indexer: Indexer,
        store: VectorStore,
        statuses: Arc<StatusBook>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            collection,
            inner: Mutex::new(SyncInner { detector, indexer }),
            store,
            statuses,
            audit: AuditLog::new(),
            sync_cache: Mutex::new(None),
            settings,
            cancel: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Swap the ignore matcher (a re-index request may carry new patterns).
    pub fn set_matcher(&self, matcher: crate::ignore_rules::IgnoreMatcher) {
        self.lock_inner().detector.set_matcher(matcher);
    }

    /// Workflow A: full index, initial or forced.
    pub fn index(
        &self,
        force: bool,
        progress: Option<&dyn Fn(u8)>,
    ) -> Result<IndexStats, SyncError> {
        let span = tracing::info_span!("full_index", root = %self.root.display(), force);
        let _span = span.entered();

        self.cancel.store(false, Ordering::SeqCst);
        let mut inner = self.lock_inner();
        let _writer = WriterLock::acquire(inner.detector.store().snapshot_path())?;

        let started = Instant::now();
        self.statuses
            .set(&self.root, CodebaseStatus::Indexing { progress: 0 });

        let mut last_progress = 0u8;
        match self.run_full_index(&mut inner, force, progress, &mut last_progress, started) {
            Ok(stats) => {
                self.statuses.set(
                    &self.root,
                    CodebaseStatus::Indexed {
                        indexed_files: stats.indexed_files,
                        total_chunks: stats.total_chunks,
                        last_updated: Utc::now(),
                        outcome: stats.outcome,
                    },
                );
                self.invalidate_cache();
                self.audit.record(
                    "full_index",
                    SyncTrigger::Manual,
                    (stats.indexed_files, 0, 0),
                    stats.duration_ms,
                );
                tracing::info!(
                    files = stats.indexed_files,
                    chunks = stats.total_chunks,
                    "Full index complete"
                );
                Ok(stats)
            }
            Err(SyncError::Cancelled) => {
                self.statuses.set(&self.root, CodebaseStatus::NotIndexed);
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Full index failed");
                self.statuses.set(
                    &self.root,
                    CodebaseStatus::Failed {
                        error: e.to_string(),
                        last_progress,
                    },
                );
                Err(e)
            }
        }
    }

    /// Workflow B: incremental reindex.
    pub fn sync(&self, trigger: SyncTrigger) -> Result<SyncReport, SyncError> {
        let mut inner = self.lock_inner();
        let _writer = WriterLock::acquire(inner.detector.store().snapshot_path())?;

        let started = Instant::now();
        let changes = inner.detector.incremental_scan()?;
        self.apply_changes(&mut inner, changes, trigger, started)
    }

    /// Workflow C: single-file update from the watcher.
    pub fn sync_file(&self, absolute: &Path) -> Result<SingleFileReport, SyncError> {
        let mut inner = self.lock_inner();
        let _writer = WriterLock::acquire(inner.detector.store().snapshot_path())?;

        let started = Instant::now();
        let action = inner.detector.update_single_file(absolute)?;
        let action_name = action.name();
        let budget = ChunkBudget::unlimited();

        let (rel, counts) = match action {
            FileAction::Noop => {
                return Ok(SingleFileReport {
                    action: "noop",
                    relative_path: String::new(),
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            FileAction::Added(pending) | FileAction::Modified(pending) => {
                let added = !inner.detector.store().contains(&pending.path);
                if let Err(e) = self.index_one(
                    &mut inner,
                    &pending.path,
                    &pending.hash,
                    pending.mtime_ms,
                    &budget,
                ) {
                    if matches!(e, SyncError::FileUpdates(_)) {
                        self.statuses.set(
                            &self.root,
                            CodebaseStatus::Failed {
                                error: e.to_string(),
                                last_progress: 100,
                            },
                        );
                    }
                    return Err(e);
                }
                let counts = if added {
                    SyncCounts { added: 1, ..Default::default() }
                } else {
                    SyncCounts { modified: 1, ..Default::default() }
                };
                (pending.path, counts)
            }
            FileAction::Removed(rel) => {
                self.remove_file_chunks(&rel)?;
                inner.detector.store_mut().remove(&rel);
                (rel, SyncCounts { removed: 1, ..Default::default() })
            }
        };

        inner.detector.store_mut().save()?;
        self.invalidate_cache();
        self.refresh_indexed_status(&inner);

        let duration_ms = started.elapsed().as_millis() as u64;
        self.audit
            .record("file_sync", SyncTrigger::Realtime, counts.tuple(), duration_ms);
        tracing::debug!(path = %rel, action = action_name, "Realtime file sync complete");

        Ok(SingleFileReport {
            action: action_name,
            relative_path: rel,
            duration_ms,
        })
    }

    /// Freshness-gate entry point: consult the short-lived cache, run a
    /// catch-up sync when the tree drifted. Failures are logged, never
    /// surfaced; search proceeds with whatever index exists.
    pub fn check_and_maybe_sync(&self) -> FreshnessReport {
        if let Some(report) = self.cached_freshness() {
            return report;
        }

        let started = Instant::now();
        let mut inner = self.lock_inner();

        let changes = match inner.detector.incremental_scan() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Pre-search change check failed");
                return FreshnessReport {
                    had_changes: false,
                    changed_count: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    from_cache: false,
                };
            }
        };

        let had_changes = !changes.is_empty();
        let changed_count = changes.change_count();
        // apply_changes also handles the empty case: it records the
        // full-scan timestamp when the scan was a delegated full rehash.
        if let Err(e) = self.apply_changes(&mut inner, changes, SyncTrigger::PreSearch, started) {
            tracing::warn!(error = %e, "Pre-search catch-up sync failed");
        }

        self.set_cache(had_changes, changed_count);
        FreshnessReport {
            had_changes,
            changed_count,
            duration_ms: started.elapsed().as_millis() as u64,
            from_cache: false,
        }
    }

    /// Drop the collection and all local state; interrupts an in-flight
    /// full index at its next checkpoint.
    pub fn clear(&self) -> Result<(), SyncError> {
        self.cancel.store(true, Ordering::SeqCst);
        let mut inner = self.lock_inner();
        self.cancel.store(false, Ordering::SeqCst);

        self.store.drop_collection(&self.collection)?;
        let snapshot = inner.detector.store().snapshot_path().to_path_buf();
        inner.detector.store_mut().clear();
        match std::fs::remove_file(&snapshot) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SyncError::Snapshot(e.into())),
        }

        self.statuses.set(&self.root, CodebaseStatus::NotIndexed);
        self.invalidate_cache();
        tracing::info!(root = %self.root.display(), "Index cleared");
        Ok(())
    }

    /// Counters for the observability surface. Non-blocking: while a
    /// workflow holds the writer lock, the snapshot-derived fields read
    /// zero and `busy` is set.
    pub fn counters(&self) -> ControllerCounters {
        let sync_cache_live = {
            let cache = self.sync_cache.lock().unwrap_or_else(|e| e.into_inner());
            cache
                .as_ref()
                .map(|e| e.at.elapsed() < self.settings.freshness_ttl)
                .unwrap_or(false)
        };
        match self.inner.try_lock() {
            Ok(inner) => ControllerCounters {
                tracked_files: inner.detector.store().len(),
                mtime_cache_size: inner.detector.store().mtime_cache_len(),
                last_full_scan_ms: inner.detector.store().last_full_scan_ms(),
                sync_cache_live,
                busy: false,
            },
            Err(_) => ControllerCounters {
                tracked_files: 0,
                mtime_cache_size: 0,
                last_full_scan_ms: 0,
                sync_cache_live,
                busy: true,
            },
        }
    }

    fn run_full_index(
        &self,
        inner: &mut SyncInner,
        force: bool,
        progress: Option<&dyn Fn(u8)>,
        last_progress: &mut u8,
        started: Instant,
    ) -> Result<IndexStats, SyncError> {
        let prev_chunks = match self.statuses.get(&self.root) {
            CodebaseStatus::Indexed { total_chunks, .. } if !force => total_chunks,
            _ => 0,
        };

        if force {
            self.store.drop_collection(&self.collection)?;
            inner.detector.store_mut().clear();
        }
        let dimension = inner.indexer.embedder().dimension();
        self.store
            .create_hybrid_collection(&self.collection, dimension)?;

        let changes = inner.detector.full_scan()?;
        let total_work = (changes.added.len() + changes.modified.len()).max(1);
        let budget = ChunkBudget::new(self.settings.chunk_budget);

        let mut chunks_inserted = 0usize;
        let mut chunks_removed = 0usize;
        let mut failed_files = 0usize;
        let mut store_failures = 0usize;
        let mut limit_reached = false;
        let mut processed = 0usize;
        let mut last_persist = Instant::now();

        for path in &changes.removed {
            chunks_removed += self.remove_file_chunks(path)?;
            inner.detector.store_mut().remove(path);
        }
        for pending in changes.touched.iter() {
            inner
                .detector
                .store_mut()
                .touch(&pending.path, pending.mtime_ms);
        }

        for pending in changes.added.iter().chain(changes.modified.iter()) {
            if self.cancel.load(Ordering::SeqCst) {
                inner.detector.store_mut().save()?;
                return Err(SyncError::Cancelled);
            }

            match inner.indexer.process_file(&pending.path, &budget) {
                Ok(file_chunks) => {
                    let report = self.store.atomic_file_update(
                        &self.collection,
                        &pending.path,
                        &file_chunks.records,
                    );
                    if report.ok {
                        chunks_inserted += report.chunks_processed;
                        inner.detector.store_mut().upsert(
                            &pending.path,
                            pending.hash.clone(),
                            pending.mtime_ms,
                        );
                    } else {
                        let error = report.error.unwrap_or_default();
                        if error.contains("dimension") {
                            return Err(SyncError::Integrity(error));
                        }
                        tracing::warn!(path = %pending.path, error = %error, "File update failed");
                        store_failures += 1;
                    }
                    if file_chunks.truncated {
                        limit_reached = true;
                    }
                }
                Err(IndexerError::IsDirectory(p)) => {
                    return Err(SyncError::Integrity(format!(
                        "attempted to index directory {}",
                        p.display()
                    )));
                }
                Err(e) => {
                    tracing::warn!(path = %pending.path, error = %e, "Skipping file");
                    failed_files += 1;
                }
            }

            processed += 1;
            let pct = ((processed * 100) / total_work).min(100) as u8;
            *last_progress = pct;
            self.statuses
                .set_transient(&self.root, CodebaseStatus::Indexing { progress: pct });
            if let Some(cb) = progress {
                cb(pct);
            }
            if last_persist.elapsed() >= PROGRESS_PERSIST_INTERVAL {
                self.statuses.persist();
                inner.detector.store_mut().save()?;
                last_persist = Instant::now();
            }

            if budget.exhausted() {
                limit_reached = true;
                tracing::warn!(
                    budget = self.settings.chunk_budget,
                    "Chunk budget exhausted, stopping index early"
                );
                break;
            }
        }

        inner.detector.store_mut().set_last_full_scan(epoch_millis());
        inner.detector.store_mut().save()?;

        if store_failures > 0 {
            return Err(SyncError::FileUpdates(store_failures));
        }

        Ok(IndexStats {
            indexed_files: inner.detector.store().len(),
            total_chunks: (prev_chunks + chunks_inserted).saturating_sub(chunks_removed),
            failed_files,
            outcome: if limit_reached {
                IndexOutcome::LimitReached
            } else {
                IndexOutcome::Ok
            },
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Steps 3–5 of workflow B, shared with the freshness gate.
    fn apply_changes(
        &self,
        inner: &mut SyncInner,
        changes: ChangeSet,
        trigger: SyncTrigger,
        started: Instant,
    ) -> Result<SyncReport, SyncError> {
        let counts = SyncCounts {
            added: changes.added.len(),
            modified: changes.modified.len(),
            removed: changes.removed.len(),
        };

        if changes.is_empty() {
            for pending in &changes.touched {
                inner
                    .detector
                    .store_mut()
                    .touch(&pending.path, pending.mtime_ms);
            }
            if changes.from_full_scan {
                inner.detector.store_mut().set_last_full_scan(epoch_millis());
            }
            if changes.from_full_scan || !changes.touched.is_empty() {
                inner.detector.store_mut().save()?;
            }
            return Ok(SyncReport {
                counts,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let budget = ChunkBudget::unlimited();
        let mut store_failures = 0usize;

        for path in &changes.removed {
            self.remove_file_chunks(path)?;
            inner.detector.store_mut().remove(path);
        }
        for pending in &changes.touched {
            inner
                .detector
                .store_mut()
                .touch(&pending.path, pending.mtime_ms);
        }
        for pending in changes.added.iter().chain(changes.modified.iter()) {
            match self.index_one(inner, &pending.path, &pending.hash, pending.mtime_ms, &budget) {
                Ok(()) => {}
                Err(SyncError::FileUpdates(_)) => store_failures += 1,
                Err(e) => return Err(e),
            }
        }

        if changes.from_full_scan {
            inner.detector.store_mut().set_last_full_scan(epoch_millis());
        }
        inner.detector.store_mut().save()?;
        self.invalidate_cache();
        self.refresh_indexed_status(inner);

        let duration_ms = started.elapsed().as_millis() as u64;
        self.audit
            .record("incremental_sync", trigger, counts.tuple(), duration_ms);
        tracing::info!(
            added = counts.added,
            modified = counts.modified,
            removed = counts.removed,
            duration_ms,
            "Incremental sync complete"
        );

        if store_failures > 0 {
            self.statuses.set(
                &self.root,
                CodebaseStatus::Failed {
                    error: format!("{} file update(s) failed", store_failures),
                    last_progress: 100,
                },
            );
            return Err(SyncError::FileUpdates(store_failures));
        }

        Ok(SyncReport {
            counts,
            duration_ms,
        })
    }

    /// Chunk, embed, and atomically replace one file, then record its hash.
    /// Per-file read/embed failures are tolerated (logged, hash left so a
    /// later sync retries); exhausted store retries are not.
    fn index_one(
        &self,
        inner: &mut SyncInner,
        path: &str,
        hash: &str,
        mtime_ms: i64,
        budget: &ChunkBudget,
    ) -> Result<(), SyncError> {
        let file_chunks = match inner.indexer.process_file(path, budget) {
            Ok(fc) => fc,
            Err(IndexerError::IsDirectory(p)) => {
                return Err(SyncError::Integrity(format!(
                    "attempted to index directory {}",
                    p.display()
                )));
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "Skipping unreadable file");
                return Ok(());
            }
        };

        let report =
            self.store
                .atomic_file_update(&self.collection, path, &file_chunks.records);
        if !report.ok {
            let error = report.error.unwrap_or_default();
            if error.contains("dimension") {
                return Err(SyncError::Integrity(error));
            }
            tracing::warn!(path, error = %error, "Atomic file update failed");
            return Err(SyncError::FileUpdates(1));
        }

        inner
            .detector
            .store_mut()
            .upsert(path, hash.to_string(), mtime_ms);
        Ok(())
    }

    /// Delete every chunk whose `relativePath` matches, in batches.
    fn remove_file_chunks(&self, path: &str) -> Result<usize, SyncError> {
        let existing = self
            .store
            .query(&self.collection, &Filter::by_path(path), None)?;
        if existing.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = existing.into_iter().map(|r| r.id).collect();
        let report = self.store.bulk_delete(&self.collection, &ids);
        if !report.failed_ids.is_empty() {
            tracing::warn!(
                path,
                failed = report.failed_ids.len(),
                "Some chunk deletions failed"
            );
        }
        Ok(report.deleted_count)
    }

    fn refresh_indexed_status(&self, inner: &SyncInner) {
        if let CodebaseStatus::Indexed {
            total_chunks,
            outcome,
            ..
        } = self.statuses.get(&self.root)
        {
            // total_chunks is carried over; recounting the store on every
            // sync would cost a full metadata query.
            self.statuses.set(
                &self.root,
                CodebaseStatus::Indexed {
                    indexed_files: inner.detector.store().len(),
                    total_chunks,
                    last_updated: Utc::now(),
                    outcome,
                },
            );
        }
    }

    fn cached_freshness(&self) -> Option<FreshnessReport> {
        let cache = self.sync_cache.lock().unwrap_or_else(|e| e.into_inner());
        let entry = cache.as_ref()?;
        if entry.at.elapsed() < self.settings.freshness_ttl {
            tracing::debug!(root = %self.root.display(), "Freshness cache hit");
            Some(FreshnessReport {
                had_changes: entry.had_changes,
                changed_count: entry.changed_count,
                duration_ms: 0,
                from_cache: true,
            })
        } else {
            None
        }
    }

    fn set_cache(&self, had_changes: bool, changed_count: usize) {
        let mut cache = self.sync_cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = Some(SyncCacheEntry {
            at: Instant::now(),
            had_changes,
            changed_count,
        });
    }

    fn invalidate_cache(&self) {
        let mut cache = self.sync_cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = None;
    }

    fn lock_inner(&self) -> MutexGuard<'_, SyncInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerCounters {
    pub tracked_files: usize,
    pub mtime_cache_size: usize,
    pub last_full_scan_ms: i64,
    pub sync_cache_live: bool,
    /// A workflow held the writer lock while these counters were read.
    pub busy: bool,
}

/// Advisory cross-process writer lock next to the hash snapshot. Two
/// indexer processes against the same codebase are refused rather than
/// silently corrupting state.
struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    fn acquire(snapshot_path: &Path) -> Result<Self, SyncError> {
        let path = snapshot_path.with_extension("lock");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(HashStoreError::from)?;
        }

        for _ in 0..2 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    use std::io::Write;
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let stale = std::fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|t| t.elapsed().ok())
                        .map(|age| age > STALE_LOCK_AGE)
                        .unwrap_or(false);
                    if stale {
                        tracing::warn!(path = %path.display(), "Removing stale writer lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    let holder = std::fs::read_to_string(&path).unwrap_or_default();
                    return Err(SyncError::Locked(format!(
                        "pid {} at {}",
                        holder.trim(),
                        path.display()
                    )));
                }
                Err(e) => return Err(SyncError::Snapshot(e.into())),
            }
        }
        Err(SyncError::Locked(path.display().to_string()))
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
