//! Service wiring
//!
//! Owns the process-wide pieces (registry, connection pool, freshness
//! gate, embedder) and assembles the per-codebase stack (matcher, hash
//! store, detector, indexer, controller, watcher). Both the CLI and the
//! MCP tool surface drive this one facade.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::chunker::{chunker_for, supported_extensions, SplitterKind};
use crate::config::Config;
use crate::detector::ChangeDetector;
use crate::embedder::{Embedder, HashEmbedder};
use crate::freshness::{FreshnessError, FreshnessGate, SearchClearance};
use crate::hash_store::HashStore;
use crate::ignore_rules::IgnoreMatcher;
use crate::indexer::Indexer;
use crate::registry::{collection_name, Codebase, CodebaseStatus, Registry};
use crate::store::{
    memory::MemoryBackend, BackendError, ConnectionPool, Filter, ScoredHit, StoreError,
    StoreTarget, VectorBackend, VectorStore,
};
use crate::sync::{SyncController, SyncError, SyncSettings};
use crate::watcher::{RealtimeWatcher, WatcherConfig, WatcherError};

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Bad caller input; surfaced verbatim, never retried.
    #[error("{0}")]
    Input(String),
    #[error("Codebase is not indexed: {0}. Run index_codebase first.")]
    NotRegistered(PathBuf),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Snapshot(#[from] crate::hash_store::HashStoreError),
    #[error(transparent)]
    Watcher(#[from] WatcherError),
    #[error(transparent)]
    Freshness(#[from] FreshnessError),
    #[error(transparent)]
    Embed(#[from] crate::embedder::EmbedError),
}

/// Options accepted by an index request.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub force: bool,
    pub splitter: SplitterKind,
    pub custom_extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
}

/// A search hit as returned to callers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResult {
    #[serde(rename = "relativePath")]
    pub relative_path: String,
    #[serde(rename = "startLine")]
    pub start_line: i64,
    #[serde(rename = "endLine")]
    pub end_line: i64,
    pub language: String,
    pub content: String,
    pub score: f32,
}

impl From<ScoredHit> for SearchResult {
    fn from(hit: ScoredHit) -> Self {
        let language = hit
            .record
            .metadata
            .get("language")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        SearchResult {
            relative_path: hit.record.relative_path,
            start_line: hit.record.start_line,
            end_line: hit.record.end_line,
            language,
            content: hit.record.content,
            score: hit.score,
        }
    }
}

/// Search response with the incompleteness annotation from the gate.
#[derive(Debug, serde::Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Indexing was still running; results may be incomplete.
    pub incomplete: bool,
}

pub struct Service {
    pub config: Config,
    pub registry: Registry,
    pub pool: Arc<ConnectionPool>,
    pub gate: FreshnessGate,
    embedder: Arc<dyn Embedder>,
}

impl Service {
    pub fn new(config: Config, state_dir: &Path) -> Result<Self, ServiceError> {
        let embedder = build_embedder(&config)?;
        let pool = ConnectionPool::new(Box::new(backend_factory), config.pool_idle_reap());
        Ok(Self {
            gate: FreshnessGate::new(config.freshness_gate.enabled),
            registry: Registry::new(state_dir),
            pool,
            embedder,
            config,
        })
    }

    /// Replace the embedder (e.g. a remote provider wired in by the host).
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    fn target(&self) -> StoreTarget {
        StoreTarget {
            address: self.config.store.address.clone(),
            username: self.config.store.username.clone(),
            token: self.config.store.token.clone(),
        }
    }

    /// Get the registered codebase for `root`, or assemble and register a
    /// new one. An existing codebase picks up the request's ignore
    /// patterns.
    pub fn ensure_codebase(
        &self,
        root: &Path,
        options: &IndexOptions,
    ) -> Result<Arc<Codebase>, ServiceError> {
        let root = validate_root(root)?;

        if let Some(existing) = self.registry.get(&root) {
            if !options.ignore_patterns.is_empty() {
                let matcher = IgnoreMatcher::for_codebase(&root, &options.ignore_patterns);
                existing.controller.set_matcher(matcher);
            }
            return Ok(existing);
        }

        let matcher = IgnoreMatcher::for_codebase(&root, &options.ignore_patterns);
        let hash_store = HashStore::open(&root, &self.registry.state_dir)?;
        let detector = ChangeDetector::new(&root, hash_store, matcher)
            .with_full_scan_interval(self.config.full_scan_interval())
            .with_max_file_size(self.config.max_file_size);
        let indexer = Indexer::new(
            &root,
            chunker_for(options.splitter),
            Arc::clone(&self.embedder),
        );
        let store = VectorStore::connect(&self.pool, &self.target())?;
        let collection = collection_name(&root);

        let settings = SyncSettings {
            chunk_budget: self.config.chunk_budget,
            freshness_ttl: self.config.freshness_ttl(),
        };
        let controller = Arc::new(SyncController::new(
            &root,
            collection.clone(),
            detector,
            indexer,
            store,
            Arc::clone(&self.registry.statuses),
            settings,
        ));

        let mut watch_extensions: HashSet<String> = match &self.config.supported_extensions {
            Some(exts) => exts.iter().map(|e| e.trim_start_matches('.').to_string()).collect(),
            None => supported_extensions().into_iter().map(String::from).collect(),
        };
        watch_extensions.extend(
            options
                .custom_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_string()),
        );

        let codebase = Arc::new(Codebase {
            root: root.clone(),
            collection,
            controller,
            watcher: std::sync::Mutex::new(None),
            watch_extensions,
        });
        self.registry.insert(Arc::clone(&codebase));
        Ok(codebase)
    }

    /// The registered codebase for `root`. A codebase indexed by a
    /// previous process (status on disk, no live registration) is
    /// re-assembled on demand.
    pub fn codebase(&self, root: &Path) -> Result<Arc<Codebase>, ServiceError> {
        let root = validate_root(root)?;
        if let Some(codebase) = self.registry.get(&root) {
            return Ok(codebase);
        }
        if self.registry.statuses.get(&root) == CodebaseStatus::NotIndexed {
            return Err(ServiceError::NotRegistered(root));
        }
        self.ensure_codebase(&root, &IndexOptions::default())
    }

    /// Gate, embed, and run a hybrid search.
    pub fn search(
        &self,
        root: &Path,
        query: &str,
        limit: usize,
        extension_filter: Vec<String>,
    ) -> Result<SearchResponse, ServiceError> {
        let codebase = self.codebase(root)?;
        let status = self.registry.statuses.get(&codebase.root);
        let clearance: SearchClearance = self.gate.ensure_fresh(&codebase, &status)?;

        let dense = self.embedder.embed_query(query)?;
        let filter = Filter::by_extensions(extension_filter);
        let hits = codebase.controller.store().hybrid_search(
            &codebase.collection,
            &dense,
            query,
            limit,
            &filter,
        )?;

        Ok(SearchResponse {
            results: hits.into_iter().map(SearchResult::from).collect(),
            incomplete: clearance.incomplete,
        })
    }

    /// Start the realtime watcher for a codebase.
    pub fn enable_realtime(&self, root: &Path) -> Result<(), ServiceError> {
        if !self.config.realtime_sync.enabled {
            return Err(ServiceError::Input(
                "Realtime sync is disabled by configuration".to_string(),
            ));
        }
        let codebase = self.codebase(root)?;
        let status = self.registry.statuses.get(&codebase.root);
        if !status.is_indexed() && !status.is_indexing() {
            return Err(ServiceError::NotRegistered(codebase.root.clone()));
        }
        let mut slot = codebase.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Ok(());
        }

        let watcher_config = WatcherConfig {
            debounce: self.config.debounce(),
            extensions: codebase.watch_extensions.clone(),
            ..WatcherConfig::default()
        };
        let matcher = IgnoreMatcher::for_codebase(&codebase.root, &[] as &[&str]);
        let watcher = RealtimeWatcher::spawn(
            &codebase.root,
            matcher,
            watcher_config,
            Arc::clone(&codebase.controller),
        )?;
        *slot = Some(watcher);
        Ok(())
    }

    /// Stop the watcher, cancelling all pending debounce timers.
    pub fn disable_realtime(&self, root: &Path) -> Result<(), ServiceError> {
        let codebase = self.codebase(root)?;
        let watcher = {
            let mut slot = codebase.watcher.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(watcher) = watcher {
            watcher.stop();
            tracing::info!(root = %codebase.root.display(), "Realtime sync disabled");
        }
        Ok(())
    }

    /// Drop the collection, snapshot, and registration for a codebase.
    pub fn clear(&self, root: &Path) -> Result<(), ServiceError> {
        let codebase = self.ensure_codebase(root, &IndexOptions::default())?;
        self.disable_realtime(&codebase.root)?;
        codebase.controller.clear()?;
        self.registry.remove(&codebase.root);
        Ok(())
    }

    pub fn status(&self, root: &Path) -> Result<CodebaseStatus, ServiceError> {
        let root = validate_root(root)?;
        Ok(self.registry.statuses.get(&root))
    }

    /// Best-effort shutdown: stop watchers and persist status.
    pub fn shutdown(&self) {
        for codebase in self.registry.all() {
            let watcher = {
                let mut slot = codebase.watcher.lock().unwrap_or_else(|e| e.into_inner());
                slot.take()
            };
            if let Some(watcher) = watcher {
                watcher.stop();
            }
        }
        self.registry.statuses.persist();
    }
}

/// Absolute, existing directory; everything else is an input error.
pub fn validate_root(root: &Path) -> Result<PathBuf, ServiceError> {
    if !root.is_absolute() {
        return Err(ServiceError::Input(format!(
            "Path must be absolute: {}",
            root.display()
        )));
    }
    let meta = std::fs::metadata(root).map_err(|_| {
        ServiceError::Input(format!("Directory does not exist: {}", root.display()))
    })?;
    if !meta.is_dir() {
        return Err(ServiceError::Input(format!(
            "Not a directory: {}",
            root.display()
        )));
    }
    // Canonicalize so watcher events and stored paths agree on one form.
    root.canonicalize().map_err(|e| {
        ServiceError::Input(format!("Cannot resolve {}: {}", root.display(), e))
    })
}

fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>, ServiceError> {
    match config.embedding.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.embedding.dimension))),
        other => Err(ServiceError::Input(format!(
            "Unknown embedding provider '{}'. Built-in providers: hash",
            other
        ))),
    }
}

/// Engine driver selection by address scheme. Remote drivers are wired in
/// by the host; the embedded engine serves `memory://`.
fn backend_factory(target: &StoreTarget) -> Result<Arc<dyn VectorBackend>, BackendError> {
    if target.address.starts_with("memory://") {
        Ok(Arc::new(MemoryBackend::new()))
    } else {
        Err(BackendError::Other(format!(
            "No driver for vector store address '{}'",
            target.address
        )))
    }
}
