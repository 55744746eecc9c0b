//! Process-wide codebase registry and status book
//!
//! Tracks every codebase the service knows about, owns the status state
//! machine, and persists the status map atomically. Collection names are
//! derived from the codebase root via a stable hash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash_store::root_key;
use crate::store::COLLECTION_PREFIX;

/// Terminal outcome of a full index run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    Ok,
    LimitReached,
}

/// Lifecycle of a codebase.
///
/// ```text
/// not_indexed ──index()──► indexing ──ok──► indexed
///                                │
///                                └──err──► failed
/// indexed ──clear()──► not_indexed
/// failed ──index()──► indexing (retry)
/// indexed ──index(force)──► indexing (drops collection first)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CodebaseStatus {
    #[serde(rename = "notindexed")]
    NotIndexed,
    Indexing {
        progress: u8,
    },
    Indexed {
        indexed_files: usize,
        total_chunks: usize,
        last_updated: DateTime<Utc>,
        outcome: IndexOutcome,
    },
    #[serde(rename = "indexfailed")]
    Failed {
        error: String,
        last_progress: u8,
    },
}

impl CodebaseStatus {
    pub fn is_indexed(&self) -> bool {
        matches!(self, CodebaseStatus::Indexed { .. })
    }

    pub fn is_indexing(&self) -> bool {
        matches!(self, CodebaseStatus::Indexing { .. })
    }
}

/// Persisted map *absolute path → status record*, atomically overwritten
/// at each sync boundary.
pub struct StatusBook {
    path: PathBuf,
    map: Mutex<HashMap<String, CodebaseStatus>>,
}

impl StatusBook {
    /// Load from `<state-dir>/status.json`, starting empty if absent.
    pub fn open(state_dir: &Path) -> Self {
        let path = state_dir.join("status.json");
        let map = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Corrupt status snapshot, starting fresh");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read status snapshot");
                HashMap::new()
            }
        };
        Self {
            path,
            map: Mutex::new(map),
        }
    }

    pub fn get(&self, root: &Path) -> CodebaseStatus {
        self.lock()
            .get(&key_of(root))
            .cloned()
            .unwrap_or(CodebaseStatus::NotIndexed)
    }

    /// Record a status and persist the whole map.
    pub fn set(&self, root: &Path, status: CodebaseStatus) {
        {
            let mut map = self.lock();
            if status == CodebaseStatus::NotIndexed {
                map.remove(&key_of(root));
            } else {
                map.insert(key_of(root), status);
            }
        }
        self.persist();
    }

    /// Update in memory without persisting; used for fine-grained progress
    /// between rate-limited snapshot writes.
    pub fn set_transient(&self, root: &Path, status: CodebaseStatus) {
        let mut map = self.lock();
        map.insert(key_of(root), status);
    }

    pub fn remove(&self, root: &Path) {
        self.lock().remove(&key_of(root));
        self.persist();
    }

    pub fn persist(&self) {
        let content = {
            let map = self.lock();
            match serde_json::to_string_pretty(&*map) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize status snapshot");
                    return;
                }
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let tmp = self
            .path
            .with_extension(format!("json.tmp.{}", std::process::id()));
        let write = std::fs::write(&tmp, &content)
            .and_then(|_| std::fs::rename(&tmp, &self.path));
        if let Err(e) = write {
            let _ = std::fs::remove_file(&tmp);
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist status snapshot");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CodebaseStatus>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn key_of(root: &Path) -> String {
    root.to_string_lossy().to_string()
}

/// Collection name for a codebase root: stable hash with the hybrid prefix.
pub fn collection_name(root: &Path) -> String {
    format!("{}{}", COLLECTION_PREFIX, root_key(root))
}

/// One registered codebase and everything it exclusively owns.
pub struct Codebase {
    pub root: PathBuf,
    pub collection: String,
    pub controller: Arc<crate::sync::SyncController>,
    pub watcher: Mutex<Option<crate::watcher::RealtimeWatcher>>,
    /// Extensions the watcher emits for (defaults plus per-request extras).
    pub watch_extensions: std::collections::HashSet<String>,
}

impl Codebase {
    pub fn watcher_enabled(&self) -> bool {
        self.watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn pending_ops(&self) -> usize {
        self.watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|w| w.pending_ops())
            .unwrap_or(0)
    }
}

/// Process-wide map of registered codebases. Each codebase exclusively
/// owns its controller, watcher, and audit ring; only the connection pool
/// is shared underneath.
pub struct Registry {
    codebases: Mutex<HashMap<PathBuf, Arc<Codebase>>>,
    pub statuses: Arc<StatusBook>,
    pub state_dir: PathBuf,
}

impl Registry {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            codebases: Mutex::new(HashMap::new()),
            statuses: Arc::new(StatusBook::open(state_dir)),
            state_dir: state_dir.to_path_buf(),
        }
    }

    pub fn get(&self, root: &Path) -> Option<Arc<Codebase>> {
        self.lock().get(root).cloned()
    }

    pub fn insert(&self, codebase: Arc<Codebase>) {
        self.lock().insert(codebase.root.clone(), codebase);
    }

    pub fn remove(&self, root: &Path) -> Option<Arc<Codebase>> {
        self.lock().remove(root)
    }

    pub fn all(&self) -> Vec<Arc<Codebase>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<Codebase>>> {
        self.codebases.lock().unwrap_or_else(|e| e.into_inner())
    }
}
