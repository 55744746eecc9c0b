//! File-to-chunks pipeline
//!
//! Reads a file, delegates splitting to the chunker, requests embeddings
//! in one batch per file, and produces records ready for insertion. A
//! shared per-run budget caps the total number of chunks a workflow may
//! emit.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::chunker::Chunker;
use crate::embedder::{EmbedError, Embedder};
use crate::hash_store::hash_bytes;
use crate::store::ChunkRecord;

/// Chunk IDs keep this many hex characters, comfortably inside the
/// store's 512-character primary-key limit.
const CHUNK_ID_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum IndexerError {
    /// Recoverable: the caller counts the failure and moves on.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Refusing to index a directory: {0}")]
    IsDirectory(PathBuf),
    #[error(transparent)]
    Embed(#[from] EmbedError),
}

/// Shared chunk budget for one workflow run.
pub struct ChunkBudget {
    limit: usize,
    used: AtomicUsize,
}

impl ChunkBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Effectively unbounded, for incremental workflows.
    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    /// Reserve up to `want` chunks; returns how many were granted.
    pub fn take(&self, want: usize) -> usize {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let granted = want.min(self.limit.saturating_sub(current));
            match self.used.compare_exchange(
                current,
                current + granted,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return granted,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn exhausted(&self) -> bool {
        self.used() >= self.limit
    }
}

/// Chunks produced for one file, plus whether the budget cut them short.
#[derive(Debug)]
pub struct FileChunks {
    pub records: Vec<ChunkRecord>,
    pub truncated: bool,
}

pub struct Indexer {
    root: PathBuf,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
}

impl Indexer {
    pub fn new(root: &Path, chunker: Arc<dyn Chunker>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            root: root.to_path_buf(),
            chunker,
            embedder,
        }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Transform one file into insertable chunk records.
    ///
    /// Read failures are recoverable: the caller counts them without
    /// aborting the workflow.
    pub fn process_file(
        &self,
        relative_path: &str,
        budget: &ChunkBudget,
    ) -> Result<FileChunks, IndexerError> {
        let absolute = self.root.join(relative_path);
        let meta = std::fs::metadata(&absolute).map_err(|e| IndexerError::Read {
            path: absolute.clone(),
            source: e,
        })?;
        if meta.is_dir() {
            return Err(IndexerError::IsDirectory(absolute));
        }

        let content = std::fs::read_to_string(&absolute).map_err(|e| IndexerError::Read {
            path: absolute.clone(),
            source: e,
        })?;

        let extension = Path::new(relative_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();

        let mut spans = self.chunker.chunk(&content, &extension);
        let granted = budget.take(spans.len());
        let truncated = granted < spans.len();
        if truncated {
            tracing::warn!(
                path = relative_path,
                produced = spans.len(),
                granted,
                "Chunk budget reached, truncating file"
            );
            spans.truncate(granted);
        }
        if spans.is_empty() {
            return Ok(FileChunks {
                records: Vec::new(),
                truncated,
            });
        }

        let texts: Vec<&str> = spans.iter().map(|s| s.content.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;

        let codebase_path = self.root.to_string_lossy().to_string();
        let records = spans
            .into_iter()
            .zip(vectors)
            .map(|(span, vector)| ChunkRecord {
                id: chunk_id(relative_path, span.start_line, span.end_line, &span.content),
                vector,
                metadata: serde_json::json!({
                    "codebasePath": codebase_path,
                    "language": span.language,
                }),
                content: span.content,
                relative_path: relative_path.to_string(),
                start_line: span.start_line as i64,
                end_line: span.end_line as i64,
                file_extension: extension.clone(),
            })
            .collect();

        Ok(FileChunks { records, truncated })
    }
}

/// Stable chunk identity: hash of path, line range, and content.
pub fn chunk_id(relative_path: &str, start_line: u32, end_line: u32, content: &str) -> String {
    let payload = format!("{}:{}:{}:{}", relative_path, start_line, end_line, content);
    let mut id = hash_bytes(payload.as_bytes());
    id.truncate(CHUNK_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::LineChunker;
    use crate::embedder::HashEmbedder;
    use tempfile::TempDir;

    fn indexer(root: &Path) -> Indexer {
        Indexer::new(
            root,
            Arc::new(LineChunker::default()),
            Arc::new(HashEmbedder::new(32)),
        )
    }

    #[test]
    fn test_process_file_produces_records() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "print(1)\n").unwrap();

        let idx = indexer(dir.path());
        let budget = ChunkBudget::unlimited();
        let out = idx.process_file("a.py", &budget).unwrap();

        assert_eq!(out.records.len(), 1);
        assert!(!out.truncated);
        let rec = &out.records[0];
        assert_eq!(rec.relative_path, "a.py");
        assert_eq!(rec.start_line, 1);
        assert_eq!(rec.end_line, 1);
        assert_eq!(rec.file_extension, "py");
        assert_eq!(rec.vector.len(), 32);
        assert_eq!(rec.metadata["language"], "python");
    }

    #[test]
    fn test_chunk_id_stable_and_distinct() {
        let a = chunk_id("a.py", 1, 1, "print(1)");
        assert_eq!(a, chunk_id("a.py", 1, 1, "print(1)"));
        assert_ne!(a, chunk_id("a.py", 1, 1, "print(2)"));
        assert_ne!(a, chunk_id("b.py", 1, 1, "print(1)"));
        assert_eq!(a.len(), CHUNK_ID_LEN);
    }

    #[test]
    fn test_missing_file_is_recoverable_read_error() {
        let dir = TempDir::new().unwrap();
        let idx = indexer(dir.path());
        let err = idx
            .process_file("ghost.py", &ChunkBudget::unlimited())
            .unwrap_err();
        assert!(matches!(err, IndexerError::Read { .. }));
    }

    #[test]
    fn test_directory_is_integrity_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let idx = indexer(dir.path());
        let err = idx
            .process_file("sub", &ChunkBudget::unlimited())
            .unwrap_err();
        assert!(matches!(err, IndexerError::IsDirectory(_)));
    }

    #[test]
    fn test_budget_truncates() {
        let dir = TempDir::new().unwrap();
        let body = (0..200).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        std::fs::write(dir.path().join("big.py"), body).unwrap();

        let idx = indexer(dir.path());
        let budget = ChunkBudget::new(1);
        let out = idx.process_file("big.py", &budget).unwrap();
        assert_eq!(out.records.len(), 1);
        assert!(out.truncated);
        assert!(budget.exhausted());
    }

    #[test]
    fn test_budget_take_is_cumulative() {
        let budget = ChunkBudget::new(10);
        assert_eq!(budget.take(6), 6);
        assert_eq!(budget.take(6), 4);
        assert_eq!(budget.take(1), 0);
        assert!(budget.exhausted());
    }

    #[test]
    fn test_unsupported_extension_yields_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.bin"), "xx").unwrap();
        let idx = indexer(dir.path());
        let out = idx
            .process_file("data.bin", &ChunkBudget::unlimited())
            .unwrap();
        assert!(out.records.is_empty());
    }
}
