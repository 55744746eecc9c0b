//! Configuration file support
//!
//! Config files are loaded in order (later overrides earlier):
//! 1. `~/.config/codesync/config.toml` (user defaults)
//! 2. `.codesync.toml` in the codebase root (project overrides)
//!
//! Every option is an enumerated recognized key; unknown keys are ignored
//! with a warning.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Top-level keys this loader understands.
const KNOWN_KEYS: &[&str] = &[
    "embedding",
    "store",
    "realtime_sync",
    "freshness_gate",
    "pool",
    "full_scan_interval_ms",
    "chunk_budget",
    "max_file_size",
    "supported_extensions",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding provider; `hash` is the built-in offline provider.
    pub provider: String,
    pub model: String,
    /// Must match the collection dimension.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "token-hash-v1".to_string(),
            dimension: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Vector engine address; `memory://` selects the embedded engine.
    pub address: String,
    pub username: Option<String>,
    pub token: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "memory://".to_string(),
            username: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeSyncConfig {
    /// Master switch for the watcher.
    pub enabled: bool,
    /// Enable the watcher automatically when indexing completes.
    pub auto_enable: bool,
    /// Per-`(event, path)` debounce window.
    pub debounce_ms: u64,
}

impl Default for RealtimeSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_enable: false,
            debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FreshnessGateConfig {
    pub enabled: bool,
    pub cache_ttl_ms: u64,
}

impl Default for FreshnessGateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub idle_reap_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_reap_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub realtime_sync: RealtimeSyncConfig,
    pub freshness_gate: FreshnessGateConfig,
    pub pool: PoolConfig,
    pub full_scan_interval_ms: u64,
    pub chunk_budget: usize,
    pub max_file_size: u64,
    /// Overrides the built-in supported-extension list for the watcher.
    pub supported_extensions: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            realtime_sync: RealtimeSyncConfig::default(),
            freshness_gate: FreshnessGateConfig::default(),
            pool: PoolConfig::default(),
            full_scan_interval_ms: 300_000,
            chunk_budget: 450_000,
            max_file_size: 1_048_576,
            supported_extensions: None,
        }
    }
}

impl Config {
    /// Load configuration from user and project config files.
    pub fn load(project_root: Option<&Path>) -> Self {
        let user_config = dirs::config_dir()
            .map(|d| d.join("codesync/config.toml"))
            .and_then(|p| Self::load_file(&p));

        let project_config = project_root
            .map(|root| root.join(".codesync.toml"))
            .and_then(|p| Self::load_file(&p));

        match (user_config, project_config) {
            (Some(_), Some(project)) | (None, Some(project)) => project,
            (Some(user), None) => user,
            (None, None) => Self::default(),
        }
    }

    /// Load configuration from a specific file.
    pub fn load_file(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read config {}: {}", path.display(), e);
                return None;
            }
        };

        let table: toml::Table = match content.parse() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Failed to parse config {}: {}", path.display(), e);
                return None;
            }
        };
        warn_unknown_keys(&table, path);

        match toml::Table::try_into(table) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Invalid config {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn full_scan_interval(&self) -> Duration {
        Duration::from_millis(self.full_scan_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.realtime_sync.debounce_ms)
    }

    pub fn freshness_ttl(&self) -> Duration {
        Duration::from_millis(self.freshness_gate.cache_ttl_ms)
    }

    pub fn pool_idle_reap(&self) -> Duration {
        Duration::from_millis(self.pool.idle_reap_ms)
    }
}

fn warn_unknown_keys(table: &toml::Table, path: &Path) {
    let known: HashSet<&str> = KNOWN_KEYS.iter().copied().collect();
    for key in table.keys() {
        if !known.contains(key.as_str()) {
            tracing::warn!(
                "Unknown config key '{}' in {}; ignoring",
                key,
                path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chunk_budget, 450_000);
        assert_eq!(config.full_scan_interval_ms, 300_000);
        assert_eq!(config.realtime_sync.debounce_ms, 500);
        assert!(config.realtime_sync.enabled);
        assert!(!config.realtime_sync.auto_enable);
        assert!(config.freshness_gate.enabled);
        assert_eq!(config.freshness_gate.cache_ttl_ms, 2000);
        assert_eq!(config.pool.idle_reap_ms, 600_000);
    }

    #[test]
    fn test_load_file_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
chunk_budget = 10

[realtime_sync]
debounce_ms = 250

[store]
address = "grpc://vector-db:19530"
token = "abc"
"#,
        )
        .unwrap();

        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.chunk_budget, 10);
        assert_eq!(config.realtime_sync.debounce_ms, 250);
        assert_eq!(config.store.address, "grpc://vector-db:19530");
        // Untouched sections keep defaults.
        assert_eq!(config.embedding.dimension, 256);
    }

    #[test]
    fn test_unknown_keys_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "chunk_budget = 7\nfuture_option = true\n").unwrap();

        // Unknown top-level keys warn but do not fail the load.
        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.chunk_budget, 7);
    }

    #[test]
    fn test_missing_file_is_none() {
        assert!(Config::load_file(Path::new("/no/such/config.toml")).is_none());
    }
}
