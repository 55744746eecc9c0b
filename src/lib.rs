//! # codesync - Incremental Vector Index Synchronization
//!
//! Keeps a remote vector code-search index consistent with a local source
//! tree. The engine detects file additions, modifications, and deletions
//! through content hashes and a Merkle summary; transforms changed files
//! into embedding-ready chunks; and reflects those changes atomically
//! into the vector store. An MCP tool surface over stdio exposes it to an
//! AI-assistant host.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use codesync::{Config, IndexOptions, Service};
//!
//! # fn main() -> anyhow::Result<()> {
//! let service = Arc::new(Service::new(Config::default(), Path::new("/tmp/codesync"))?);
//!
//! let codebase = service.ensure_codebase(Path::new("/work/my-project"), &IndexOptions::default())?;
//! codebase.controller.index(false, None)?;
//!
//! let response = service.search(Path::new("/work/my-project"), "retry with backoff", 10, vec![])?;
//! for hit in response.results {
//!     println!("{}:{}-{}  {:.3}", hit.relative_path, hit.start_line, hit.end_line, hit.score);
//! }
//! # Ok(())
//! # }
//! ```

// Public library API modules
pub mod audit;
pub mod chunker;
pub mod config;
pub mod detector;
pub mod embedder;
pub mod freshness;
pub mod hash_store;
pub mod health;
pub mod ignore_rules;
pub mod indexer;
pub mod mcp;
pub mod registry;
pub mod service;
pub mod store;
pub mod sync;
pub mod watcher;

// Binary front-end; public so the binary crate can call into it.
pub mod cli;

pub use audit::{AuditEntry, AuditLog, SyncTrigger};
pub use chunker::{Chunker, LineChunker, SplitterKind};
pub use config::Config;
pub use detector::{ChangeDetector, ChangeSet, FileAction};
pub use embedder::{Embedder, HashEmbedder};
pub use freshness::FreshnessGate;
pub use hash_store::HashStore;
pub use ignore_rules::IgnoreMatcher;
pub use indexer::{ChunkBudget, Indexer};
pub use registry::{Codebase, CodebaseStatus, IndexOutcome, Registry};
pub use service::{IndexOptions, SearchResponse, SearchResult, Service, ServiceError};
pub use store::{ChunkRecord, ConnectionPool, StoreTarget, VectorBackend, VectorStore};
pub use sync::{FreshnessReport, SyncController, SyncReport};
pub use watcher::{RealtimeWatcher, WatcherConfig};

use std::path::PathBuf;

/// Default per-user state directory holding hash snapshots and the status
/// map: `<data-local-dir>/codesync`.
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("codesync")
}
