//! Persistent per-codebase file hashes, mtime cache, and Merkle summary
//!
//! Each codebase owns one `HashStore`, serialized to a snapshot file under
//! the user state directory, keyed by an MD5 digest of the absolute root
//! path. Writes are atomic (write-temp-then-rename).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HashStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot parse error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Refusing to hash a directory: {0}")]
    IsDirectory(PathBuf),
}

/// On-disk snapshot layout.
#[derive(Serialize, Deserialize, Default)]
struct SnapshotFile {
    #[serde(rename = "fileHashes")]
    file_hashes: Vec<(String, String)>,
    #[serde(rename = "merkleDAG")]
    merkle_dag: MerkleSummary,
    #[serde(rename = "mtimeCache")]
    mtime_cache: Vec<(String, i64)>,
    #[serde(rename = "lastFullScan")]
    last_full_scan: i64,
}

/// Deterministic root summary over all file hashes.
///
/// The root is only a fast "nothing changed" short-circuit; the
/// authoritative change set always comes from per-file comparison.
#[derive(Serialize, Deserialize, Default, Clone, PartialEq, Eq, Debug)]
pub struct MerkleSummary {
    pub root: String,
}

/// Persistent map *relative path → content hash* plus mtime cache.
///
/// Paths are POSIX-normalized (forward slashes) relative to the codebase
/// root. Mutations are in-memory; callers persist with [`HashStore::save`]
/// at a sync boundary.
pub struct HashStore {
    root: PathBuf,
    snapshot_path: PathBuf,
    hashes: BTreeMap<String, String>,
    mtimes: BTreeMap<String, i64>,
    last_full_scan_ms: i64,
    merkle: Option<MerkleSummary>,
}

impl HashStore {
    /// Load the snapshot for `root` if one exists, otherwise start empty.
    pub fn open(root: &Path, state_dir: &Path) -> Result<Self, HashStoreError> {
        let snapshot_path = snapshot_path(root, state_dir);
        let mut store = Self {
            root: root.to_path_buf(),
            snapshot_path,
            hashes: BTreeMap::new(),
            mtimes: BTreeMap::new(),
            last_full_scan_ms: 0,
            merkle: None,
        };
        store.load()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.hashes.get(path).map(|s| s.as_str())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.hashes.contains_key(path)
    }

    pub fn mtime(&self, path: &str) -> Option<i64> {
        self.mtimes.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn mtime_cache_len(&self) -> usize {
        self.mtimes.len()
    }

    pub fn last_full_scan_ms(&self) -> i64 {
        self.last_full_scan_ms
    }

    pub fn set_last_full_scan(&mut self, epoch_ms: i64) {
        self.last_full_scan_ms = epoch_ms;
    }

    /// Iterate `(path, hash)` pairs in sorted path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.hashes.iter().map(|(p, h)| (p.as_str(), h.as_str()))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.hashes.keys().map(|p| p.as_str())
    }

    pub fn upsert(&mut self, path: &str, hash: String, mtime_ms: i64) {
        self.hashes.insert(path.to_string(), hash);
        self.mtimes.insert(path.to_string(), mtime_ms);
        self.merkle = None;
    }

    /// Refresh the cached mtime without touching the hash.
    pub fn touch(&mut self, path: &str, mtime_ms: i64) {
        if self.hashes.contains_key(path) {
            self.mtimes.insert(path.to_string(), mtime_ms);
        }
    }

    pub fn remove(&mut self, path: &str) {
        self.hashes.remove(path);
        self.mtimes.remove(path);
        self.merkle = None;
    }

    /// Drop all entries (forced reindex).
    pub fn clear(&mut self) {
        self.hashes.clear();
        self.mtimes.clear();
        self.last_full_scan_ms = 0;
        self.merkle = None;
    }

    /// Current Merkle summary, recomputed after any mutation.
    pub fn merkle_root(&mut self) -> MerkleSummary {
        if let Some(m) = &self.merkle {
            return m.clone();
        }
        let m = merkle_of(&self.hashes);
        self.merkle = Some(m.clone());
        m
    }

    /// Serialize to the snapshot file. Atomic: temp file + rename.
    pub fn save(&mut self) -> Result<(), HashStoreError> {
        let file = SnapshotFile {
            file_hashes: self
                .hashes
                .iter()
                .map(|(p, h)| (p.clone(), h.clone()))
                .collect(),
            merkle_dag: self.merkle_root(),
            mtime_cache: self.mtimes.iter().map(|(p, m)| (p.clone(), *m)).collect(),
            last_full_scan: self.last_full_scan_ms,
        };
        let content = serde_json::to_string(&file)?;

        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.snapshot_path.with_extension(format!(
            "json.tmp.{}",
            std::process::id()
        ));
        std::fs::write(&tmp, &content)?;
        if let Err(rename_err) = std::fs::rename(&tmp, &self.snapshot_path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(rename_err.into());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(
                &self.snapshot_path,
                std::fs::Permissions::from_mode(0o600),
            );
        }

        tracing::debug!(
            path = %self.snapshot_path.display(),
            files = self.hashes.len(),
            "Hash snapshot saved"
        );
        Ok(())
    }

    /// Reload from the snapshot file; a missing file resets to empty.
    pub fn load(&mut self) -> Result<(), HashStoreError> {
        let content = match std::fs::read_to_string(&self.snapshot_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.hashes.clear();
                self.mtimes.clear();
                self.last_full_scan_ms = 0;
                self.merkle = None;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let file: SnapshotFile = serde_json::from_str(&content)?;
        self.hashes = file.file_hashes.into_iter().collect();
        self.mtimes = file.mtime_cache.into_iter().collect();
        self.last_full_scan_ms = file.last_full_scan;
        self.merkle = Some(file.merkle_dag);
        Ok(())
    }

    /// Remove the snapshot file for a codebase.
    pub fn delete_snapshot(root: &Path, state_dir: &Path) -> Result<(), HashStoreError> {
        let path = snapshot_path(root, state_dir);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// SHA-256 of raw file bytes, hex-encoded. Directories are never hashed.
pub fn hash_file(path: &Path) -> Result<String, HashStoreError> {
    let meta = std::fs::metadata(path)?;
    if meta.is_dir() {
        return Err(HashStoreError::IsDirectory(path.to_path_buf()));
    }
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of a byte slice, hex-encoded.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Snapshot location: `<state-dir>/merkle/<md5(absolute root)>.json`.
pub fn snapshot_path(root: &Path, state_dir: &Path) -> PathBuf {
    state_dir.join("merkle").join(format!("{}.json", root_key(root)))
}

/// 128-bit digest of the absolute root path, hex-encoded.
pub fn root_key(root: &Path) -> String {
    let digest = Md5::digest(root.to_string_lossy().as_bytes());
    hex::encode(digest)
}

fn merkle_of(hashes: &BTreeMap<String, String>) -> MerkleSummary {
    let mut payload = String::with_capacity(5 + hashes.len() * 64);
    payload.push_str("root:");
    for hash in hashes.values() {
        payload.push_str(hash);
    }
    MerkleSummary {
        root: hash_bytes(payload.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(root: &Path, state: &TempDir) -> HashStore {
        HashStore::open(root, state.path()).unwrap()
    }

    #[test]
    fn test_roundtrip_snapshot() {
        let state = TempDir::new().unwrap();
        let root = Path::new("/work/demo");

        let mut store = open_store(root, &state);
        store.upsert("src/a.rs", "aa".repeat(32), 100);
        store.upsert("src/b.rs", "bb".repeat(32), 200);
        store.remove("src/a.rs");
        store.upsert("src/c.rs", "cc".repeat(32), 300);
        store.set_last_full_scan(12_345);
        let root_before = store.merkle_root();
        store.save().unwrap();

        let mut reloaded = open_store(root, &state);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("src/b.rs"), Some("bb".repeat(32).as_str()));
        assert_eq!(reloaded.mtime("src/c.rs"), Some(300));
        assert_eq!(reloaded.last_full_scan_ms(), 12_345);
        assert_eq!(reloaded.merkle_root(), root_before);
    }

    #[test]
    fn test_merkle_changes_on_mutation() {
        let state = TempDir::new().unwrap();
        let mut store = open_store(Path::new("/work/m"), &state);

        let empty = store.merkle_root();
        store.upsert("a.py", "11".repeat(32), 1);
        let one = store.merkle_root();
        assert_ne!(empty, one);

        store.upsert("a.py", "22".repeat(32), 2);
        assert_ne!(one, store.merkle_root());

        store.remove("a.py");
        assert_eq!(empty, store.merkle_root());
    }

    #[test]
    fn test_merkle_order_independent_of_insertion() {
        let state = TempDir::new().unwrap();
        let mut first = open_store(Path::new("/work/x"), &state);
        first.upsert("b.rs", "bb".repeat(32), 1);
        first.upsert("a.rs", "aa".repeat(32), 1);

        let mut second = open_store(Path::new("/work/y"), &state);
        second.upsert("a.rs", "aa".repeat(32), 1);
        second.upsert("b.rs", "bb".repeat(32), 1);

        assert_eq!(first.merkle_root(), second.merkle_root());
    }

    #[test]
    fn test_missing_snapshot_starts_empty() {
        let state = TempDir::new().unwrap();
        let store = open_store(Path::new("/nowhere/at/all"), &state);
        assert!(store.is_empty());
        assert_eq!(store.last_full_scan_ms(), 0);
    }

    #[test]
    fn test_delete_snapshot() {
        let state = TempDir::new().unwrap();
        let root = Path::new("/work/gone");

        let mut store = open_store(root, &state);
        store.upsert("f.rs", "dd".repeat(32), 1);
        store.save().unwrap();
        assert!(store.snapshot_path().exists());

        HashStore::delete_snapshot(root, state.path()).unwrap();
        assert!(!store.snapshot_path().exists());
        // Deleting again is a no-op.
        HashStore::delete_snapshot(root, state.path()).unwrap();
    }

    #[test]
    fn test_hash_file_rejects_directory() {
        let dir = TempDir::new().unwrap();
        let err = hash_file(dir.path()).unwrap_err();
        assert!(matches!(err, HashStoreError::IsDirectory(_)));
    }

    #[test]
    fn test_hash_file_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.py");
        std::fs::write(&path, b"print(1)\n").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"print(1)\n"));
    }

    #[test]
    fn test_touch_only_updates_known_paths() {
        let state = TempDir::new().unwrap();
        let mut store = open_store(Path::new("/work/t"), &state);
        store.touch("ghost.rs", 42);
        assert_eq!(store.mtime("ghost.rs"), None);

        store.upsert("real.rs", "ee".repeat(32), 1);
        store.touch("real.rs", 42);
        assert_eq!(store.mtime("real.rs"), Some(42));
    }
}
