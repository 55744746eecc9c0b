//! Common test fixtures
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::TestHarness;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use codesync::{Config, IndexOptions, Service};
use tempfile::TempDir;

/// A service wired to an isolated state directory plus a scratch codebase
/// tree. Both are cleaned up on drop.
pub struct TestHarness {
    pub service: Arc<Service>,
    root: PathBuf,
    _tree: TempDir,
    _state: TempDir,
}

#[allow(dead_code)]
impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let state = TempDir::new().expect("state dir");
        let tree = TempDir::new().expect("tree dir");
        let root = tree
            .path()
            .canonicalize()
            .expect("canonicalize tree root");
        let service = Arc::new(Service::new(config, state.path()).expect("service"));
        Self {
            service,
            root,
            _tree: tree,
            _state: state,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a file under the tree, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parents");
        }
        std::fs::write(path, content).expect("write file");
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.root.join(rel)).expect("remove file");
    }

    /// Register the codebase and run a full index.
    pub fn index(&self) -> codesync::sync::IndexStats {
        let codebase = self
            .service
            .ensure_codebase(&self.root, &IndexOptions::default())
            .expect("ensure codebase");
        codebase.controller.index(false, None).expect("index")
    }

    pub fn codebase(&self) -> Arc<codesync::Codebase> {
        self.service.codebase(&self.root).expect("codebase")
    }
}

/// Small embedding dimension keeps tests fast.
#[allow(dead_code)]
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.dimension = 64;
    config
}
