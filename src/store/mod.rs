//! Vector store adapter
//!
//! Wraps an external vector engine behind [`VectorBackend`] and adds the
//! behavior the sync core relies on: hybrid collection lifecycle, retry
//! with rollback for per-file updates, bulk deletion with batching, hybrid
//! dense+sparse search with reciprocal-rank fusion, and a shared keyed
//! connection pool.

pub mod backend;
pub mod memory;
pub mod pool;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

pub use backend::{
    hybrid_schema, BackendError, ChunkRecord, FieldKind, FieldSpec, Filter, ScoredHit,
    VectorBackend,
};
pub use pool::{ConnectionPool, PoolHandle, StoreTarget, DEFAULT_IDLE_REAP};

/// Collection name prefix for hybrid collections.
pub const COLLECTION_PREFIX: &str = "hybrid_code_chunks_";

/// Older dense-only collections carry this prefix; recognized when listing.
pub const LEGACY_COLLECTION_PREFIX: &str = "code_chunks_";

/// Limit applied to metadata queries with an empty filter.
pub const DEFAULT_QUERY_LIMIT: usize = 16_384;

const TRANSIENT_RETRIES: u32 = 3;
const TRANSIENT_BACKOFF_BASE: Duration = Duration::from_millis(500);

const INDEX_POLL_INITIAL: Duration = Duration::from_millis(500);
const INDEX_POLL_CAP: Duration = Duration::from_secs(5);
const INDEX_READY_TIMEOUT: Duration = Duration::from_secs(60);

const LOAD_RETRIES: u32 = 5;
const LOAD_BACKOFF_BASE: Duration = Duration::from_secs(1);

const BULK_DELETE_BATCH: usize = 1000;
const BULK_DELETE_RETRIES: u32 = 3;

const ATOMIC_UPDATE_RETRIES: u32 = 3;
const BATCH_UPDATE_CONCURRENCY: usize = 5;
const BATCH_UPDATE_PAUSE: Duration = Duration::from_millis(50);

/// Reciprocal-rank-fusion constant.
const RRF_K: f32 = 100.0;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Indexes for collection '{0}' not ready within {1:?}")]
    IndexTimeout(String, Duration),
    #[error("Failed to load collection '{0}' after {1} attempts: {2}")]
    LoadFailed(String, u32, String),
}

/// Outcome of a `bulk_delete`. Per-batch failures never fail the call.
#[derive(Debug, Default)]
pub struct BulkDeleteReport {
    pub deleted_count: usize,
    pub failed_ids: Vec<String>,
}

/// Outcome of one atomic per-file update.
#[derive(Debug)]
pub struct FileUpdateReport {
    pub ok: bool,
    pub chunks_processed: usize,
    pub error: Option<String>,
}

/// Aggregate outcome of a `batch_file_updates` call.
#[derive(Debug, Default)]
pub struct BatchUpdateReport {
    pub total_files: usize,
    pub files_ok: usize,
    pub chunks_processed: usize,
    /// `(relative_path, error)` for each failed file.
    pub failures: Vec<(String, String)>,
}

/// Adapter over a pooled engine connection.
///
/// Cheap to construct per codebase; the underlying connection is shared
/// through the process-wide [`ConnectionPool`].
pub struct VectorStore {
    handle: PoolHandle,
    query_default_limit: usize,
}

impl VectorStore {
    pub fn connect(
        pool: &Arc<ConnectionPool>,
        target: &StoreTarget,
    ) -> Result<Self, StoreError> {
        let handle = ConnectionPool::acquire(pool, target)?;
        Ok(Self {
            handle,
            query_default_limit: DEFAULT_QUERY_LIMIT,
        })
    }

    pub fn with_query_default_limit(mut self, limit: usize) -> Self {
        self.query_default_limit = limit;
        self
    }

    fn backend(&self) -> &dyn VectorBackend {
        self.handle.backend()
    }

    /// Create the hybrid schema collection, wait for both indexes to be
    /// ready, and load it for serving. Idempotent when the collection
    /// already exists.
    pub fn create_hybrid_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<(), StoreError> {
        match self
            .backend()
            .create_collection(name, dimension, &hybrid_schema())
        {
            Ok(()) => {
                tracing::info!(collection = name, dimension, "Created hybrid collection");
            }
            Err(BackendError::AlreadyExists(_)) => {
                tracing::debug!(collection = name, "Collection already exists");
            }
            Err(e) => return Err(e.into()),
        }

        self.wait_indexes_ready(name)?;
        self.load_with_retries(name)?;
        Ok(())
    }

    pub fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        match self.backend().drop_collection(name) {
            Ok(()) => Ok(()),
            Err(BackendError::CollectionNotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn has_collection(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.backend().has_collection(name)?)
    }

    /// All collections carrying one of the known chunk prefixes.
    pub fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let names = self.backend().list_collections()?;
        Ok(names
            .into_iter()
            .filter(|n| {
                n.starts_with(COLLECTION_PREFIX) || n.starts_with(LEGACY_COLLECTION_PREFIX)
            })
            .collect())
    }

    /// Insert a batch. Ensures the collection is loaded first.
    pub fn insert(&self, name: &str, chunks: &[ChunkRecord]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.backend().load_collection(name)?;
        self.retry_transient("insert", || self.backend().insert(name, chunks))?;
        Ok(())
    }

    /// Exact-match deletion by ID list.
    pub fn delete_by_ids(&self, name: &str, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(self.retry_transient("delete_by_ids", || self.backend().delete_by_ids(name, ids))?)
    }

    /// Batched deletion with per-batch retries. Never fails for a single
    /// batch: exhausted batches land in `failed_ids`.
    pub fn bulk_delete(&self, name: &str, ids: &[String]) -> BulkDeleteReport {
        let mut report = BulkDeleteReport::default();
        for batch in ids.chunks(BULK_DELETE_BATCH) {
            let mut attempt = 0u32;
            loop {
                match self.backend().delete_by_ids(name, batch) {
                    Ok(n) => {
                        report.deleted_count += n;
                        break;
                    }
                    Err(e) if attempt + 1 < BULK_DELETE_RETRIES => {
                        attempt += 1;
                        let delay = backoff(TRANSIENT_BACKOFF_BASE, attempt, INDEX_POLL_CAP);
                        tracing::warn!(
                            collection = name,
                            attempt,
                            error = %e,
                            "Delete batch failed, retrying"
                        );
                        std::thread::sleep(delay);
                    }
                    Err(e) => {
                        tracing::warn!(
                            collection = name,
                            batch_size = batch.len(),
                            error = %e,
                            "Delete batch failed permanently"
                        );
                        report.failed_ids.extend(batch.iter().cloned());
                        break;
                    }
                }
            }
        }
        report
    }

    /// Metadata-filtered query. An empty filter falls back to the default
    /// limit rather than an unbounded scan.
    pub fn query(
        &self,
        name: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let limit = limit.unwrap_or(self.query_default_limit);
        Ok(self.retry_transient("query", || self.backend().query(name, filter, limit))?)
    }

    /// Atomic per-file replace: back up existing chunks, delete them,
    /// insert the new set. On failure the backup is restored and the whole
    /// sequence retried with exponential backoff.
    pub fn atomic_file_update(
        &self,
        name: &str,
        relative_path: &str,
        new_chunks: &[ChunkRecord],
    ) -> FileUpdateReport {
        let filter = Filter::by_path(relative_path);
        let mut last_error = String::new();

        for attempt in 0..ATOMIC_UPDATE_RETRIES {
            if attempt > 0 {
                std::thread::sleep(backoff(TRANSIENT_BACKOFF_BASE, attempt, INDEX_POLL_CAP));
            }

            let backup = match self.backend().query(name, &filter, self.query_default_limit) {
                Ok(rows) => rows,
                Err(e) => {
                    last_error = format!("backup query failed: {}", e);
                    tracing::warn!(collection = name, path = relative_path, error = %e, "Atomic update backup failed");
                    continue;
                }
            };

            match self.delete_then_insert(name, &backup, new_chunks) {
                Ok(()) => {
                    return FileUpdateReport {
                        ok: true,
                        chunks_processed: new_chunks.len(),
                        error: None,
                    };
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        collection = name,
                        path = relative_path,
                        attempt,
                        error = %e,
                        "Atomic update failed, rolling back"
                    );
                    if !backup.is_empty() {
                        if let Err(rb) = self.backend().insert(name, &backup) {
                            tracing::warn!(
                                collection = name,
                                path = relative_path,
                                error = %rb,
                                "Rollback insert failed"
                            );
                        }
                    }
                }
            }
        }

        FileUpdateReport {
            ok: false,
            chunks_processed: 0,
            error: Some(last_error),
        }
    }

    fn delete_then_insert(
        &self,
        name: &str,
        backup: &[ChunkRecord],
        new_chunks: &[ChunkRecord],
    ) -> Result<(), BackendError> {
        let ids: Vec<String> = backup.iter().map(|r| r.id.clone()).collect();
        if !ids.is_empty() {
            self.backend().delete_by_ids(name, &ids)?;
        }
        if !new_chunks.is_empty() {
            self.backend().insert(name, new_chunks)?;
        }
        Ok(())
    }

    /// Run `atomic_file_update` for each entry with bounded concurrency.
    /// Per-file failures do not abort the set.
    pub fn batch_file_updates(
        &self,
        name: &str,
        updates: &[(String, Vec<ChunkRecord>)],
    ) -> BatchUpdateReport {
        let mut report = BatchUpdateReport {
            total_files: updates.len(),
            ..Default::default()
        };

        for window in updates.chunks(BATCH_UPDATE_CONCURRENCY) {
            let results: Vec<(usize, FileUpdateReport)> = std::thread::scope(|scope| {
                let handles: Vec<_> = window
                    .iter()
                    .enumerate()
                    .map(|(i, (path, chunks))| {
                        scope.spawn(move || (i, self.atomic_file_update(name, path, chunks)))
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|h| h.join().ok())
                    .collect()
            });

            for (i, file_report) in results {
                let path = &window[i].0;
                if file_report.ok {
                    report.files_ok += 1;
                    report.chunks_processed += file_report.chunks_processed;
                } else {
                    report.failures.push((
                        path.clone(),
                        file_report.error.unwrap_or_else(|| "unknown".into()),
                    ));
                }
            }

            if updates.len() > BATCH_UPDATE_CONCURRENCY {
                std::thread::sleep(BATCH_UPDATE_PAUSE);
            }
        }
        report
    }

    /// Hybrid dense+sparse search fused with reciprocal-rank fusion.
    pub fn hybrid_search(
        &self,
        name: &str,
        dense_vector: &[f32],
        query_text: &str,
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredHit>, StoreError> {
        let dense = self.retry_transient("dense_search", || {
            self.backend().dense_search(name, dense_vector, limit, filter)
        })?;
        let sparse = self.retry_transient("sparse_search", || {
            self.backend().sparse_search(name, query_text, limit, filter)
        })?;

        let mut fused = rrf_fuse(&dense, &sparse);
        fused.truncate(limit);
        Ok(fused)
    }

    /// Probe server capacity by creating and dropping a throwaway
    /// collection. `false` means the server reported a collection-count
    /// limit; other errors propagate.
    pub fn check_collection_limit(&self) -> Result<bool, StoreError> {
        let probe = format!("{}capacity_probe_{}", COLLECTION_PREFIX, std::process::id());
        match self.backend().create_collection(&probe, 4, &hybrid_schema()) {
            Ok(()) => {
                self.drop_collection(&probe)?;
                Ok(true)
            }
            Err(BackendError::AlreadyExists(_)) => {
                self.drop_collection(&probe)?;
                Ok(true)
            }
            Err(BackendError::CollectionLimit) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn wait_indexes_ready(&self, name: &str) -> Result<(), StoreError> {
        let deadline = Instant::now() + INDEX_READY_TIMEOUT;
        let mut delay = INDEX_POLL_INITIAL;
        loop {
            if self.backend().indexes_ready(name)? {
                return Ok(());
            }
            if Instant::now() + delay > deadline {
                return Err(StoreError::IndexTimeout(
                    name.to_string(),
                    INDEX_READY_TIMEOUT,
                ));
            }
            std::thread::sleep(delay);
            delay = (delay * 2).min(INDEX_POLL_CAP);
        }
    }

    fn load_with_retries(&self, name: &str) -> Result<(), StoreError> {
        let mut last = String::new();
        for attempt in 0..LOAD_RETRIES {
            if attempt > 0 {
                std::thread::sleep(backoff(LOAD_BACKOFF_BASE, attempt, Duration::from_secs(30)));
            }
            match self.backend().load_collection(name) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(collection = name, attempt, error = %e, "Collection load failed");
                    last = e.to_string();
                }
            }
        }
        Err(StoreError::LoadFailed(name.to_string(), LOAD_RETRIES, last))
    }

    fn retry_transient<T>(
        &self,
        op: &str,
        mut f: impl FnMut() -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut attempt = 0u32;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < TRANSIENT_RETRIES => {
                    attempt += 1;
                    let delay = backoff(TRANSIENT_BACKOFF_BASE, attempt, INDEX_POLL_CAP);
                    tracing::warn!(op, attempt, error = %e, "Transient store failure, retrying");
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Merge two ranked lists: `score = Σ 1/(k + rank)` per document, summed
/// across the lists it appears in.
fn rrf_fuse(dense: &[ScoredHit], sparse: &[ScoredHit]) -> Vec<ScoredHit> {
    use std::collections::HashMap;

    let mut scores: HashMap<&str, (f32, &ScoredHit)> = HashMap::new();
    for list in [dense, sparse] {
        for (rank, hit) in list.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
            scores
                .entry(hit.record.id.as_str())
                .and_modify(|(s, _)| *s += contribution)
                .or_insert((contribution, hit));
        }
    }

    let mut fused: Vec<ScoredHit> = scores
        .into_values()
        .map(|(score, hit)| ScoredHit {
            record: hit.record.clone(),
            score,
        })
        .collect();
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}

fn backoff(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    (base * factor).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> ScoredHit {
        ScoredHit {
            record: ChunkRecord {
                id: id.to_string(),
                vector: vec![],
                content: String::new(),
                relative_path: String::new(),
                start_line: 0,
                end_line: 0,
                file_extension: String::new(),
                metadata: serde_json::Value::Null,
            },
            score,
        }
    }

    #[test]
    fn test_rrf_prefers_documents_in_both_lists() {
        let dense = vec![hit("a", 0.9), hit("b", 0.8)];
        let sparse = vec![hit("c", 5.0), hit("a", 4.0)];
        let fused = rrf_fuse(&dense, &sparse);
        assert_eq!(fused[0].record.id, "a");
    }

    #[test]
    fn test_rrf_rank_not_raw_score() {
        // Raw scores are incomparable across dense and sparse; only rank
        // positions matter.
        let dense = vec![hit("a", 0.01)];
        let sparse = vec![hit("b", 99.0)];
        let fused = rrf_fuse(&dense, &sparse);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - fused[1].score).abs() < f32::EPSILON);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(5);
        assert_eq!(backoff(base, 1, cap), Duration::from_millis(500));
        assert_eq!(backoff(base, 2, cap), Duration::from_millis(1000));
        assert_eq!(backoff(base, 3, cap), Duration::from_millis(2000));
        assert_eq!(backoff(base, 10, cap), cap);
    }
}
