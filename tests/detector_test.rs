//! Change detector properties: soundness, completeness, incremental
//! equivalence, and the §4.2 edge cases.

use std::path::Path;
use std::time::Duration;

use codesync::detector::{epoch_millis, ChangeDetector};
use codesync::hash_store::{hash_bytes, HashStore};
use codesync::ignore_rules::IgnoreMatcher;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn detector(root: &Path, state: &Path, patterns: &[&str]) -> ChangeDetector {
    let store = HashStore::open(root, state).unwrap();
    let matcher = IgnoreMatcher::for_codebase(root, patterns);
    ChangeDetector::new(root, store, matcher)
}

/// Apply a change set to the detector's store, as the controller would.
fn commit(detector: &mut ChangeDetector, changes: codesync::ChangeSet) {
    for pending in changes.added.iter().chain(changes.modified.iter()) {
        detector
            .store_mut()
            .upsert(&pending.path, pending.hash.clone(), pending.mtime_ms);
    }
    for pending in &changes.touched {
        detector.store_mut().touch(&pending.path, pending.mtime_ms);
    }
    for path in &changes.removed {
        detector.store_mut().remove(path);
    }
    if changes.from_full_scan {
        detector.store_mut().set_last_full_scan(epoch_millis());
    }
    detector.store_mut().save().unwrap();
}

#[test]
fn test_full_scan_soundness() {
    let tree = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let root = tree.path().canonicalize().unwrap();

    write(&root, "a.py", "print(1)\n");
    write(&root, "src/b.rs", "fn main() {}\n");
    write(&root, ".hidden.py", "secret\n");
    write(&root, "build/out.map", "map\n");

    let mut det = detector(&root, state.path(), &["build/"]);
    let changes = det.full_scan().unwrap();
    commit(&mut det, changes);

    // Every non-ignored, non-hidden file carries the hash of its bytes.
    assert_eq!(
        det.store().get("a.py"),
        Some(hash_bytes(b"print(1)\n").as_str())
    );
    assert_eq!(
        det.store().get("src/b.rs"),
        Some(hash_bytes(b"fn main() {}\n").as_str())
    );
    // No other paths appear.
    assert_eq!(det.store().len(), 2);
    assert!(!det.store().contains(".hidden.py"));
    assert!(!det.store().contains("build/out.map"));
}

#[test]
fn test_compare_classifies_exactly() {
    let state = TempDir::new().unwrap();
    let mut a = HashStore::open(Path::new("/work/a"), state.path()).unwrap();
    let mut b = HashStore::open(Path::new("/work/b"), state.path()).unwrap();

    a.upsert("only_in_a.rs", "11".repeat(32), 1);
    a.upsert("both_same.rs", "22".repeat(32), 1);
    a.upsert("both_diff.rs", "33".repeat(32), 1);
    b.upsert("both_same.rs", "22".repeat(32), 1);
    b.upsert("both_diff.rs", "44".repeat(32), 1);
    b.upsert("only_in_b.rs", "55".repeat(32), 1);

    let diff = ChangeDetector::compare(&mut a, &mut b);
    assert_eq!(diff.removed, vec!["only_in_a.rs".to_string()]);
    assert_eq!(diff.added, vec!["only_in_b.rs".to_string()]);
    assert_eq!(diff.modified, vec!["both_diff.rs".to_string()]);
}

#[test]
fn test_compare_merkle_short_circuit() {
    let state = TempDir::new().unwrap();
    let mut a = HashStore::open(Path::new("/work/c"), state.path()).unwrap();
    let mut b = HashStore::open(Path::new("/work/d"), state.path()).unwrap();
    a.upsert("x.rs", "aa".repeat(32), 1);
    b.upsert("x.rs", "aa".repeat(32), 2);

    let diff = ChangeDetector::compare(&mut a, &mut b);
    assert!(diff.added.is_empty() && diff.modified.is_empty() && diff.removed.is_empty());
}

#[test]
fn test_incremental_matches_full_scan() {
    let tree = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let root = tree.path().canonicalize().unwrap();

    write(&root, "a.py", "one\n");
    write(&root, "b.py", "two\n");
    write(&root, "c.py", "three\n");

    let mut det = detector(&root, state.path(), &[]);
    let initial = det.full_scan().unwrap();
    assert_eq!(initial.added.len(), 3);
    commit(&mut det, initial);

    // Mutate the tree: one modify, one delete, one add.
    std::thread::sleep(Duration::from_millis(20));
    write(&root, "a.py", "one changed\n");
    std::fs::remove_file(root.join("b.py")).unwrap();
    write(&root, "d.py", "four\n");

    // A detector that must take the incremental path…
    let det_incremental = detector(&root, state.path(), &[])
        .with_full_scan_interval(Duration::from_secs(3600));
    let inc = det_incremental.incremental_scan().unwrap();

    // …and one forced through a full rehash see the same change set.
    let full = det.full_scan().unwrap();

    let paths = |v: &[codesync::detector::PendingFile]| {
        let mut p: Vec<String> = v.iter().map(|f| f.path.clone()).collect();
        p.sort();
        p
    };
    assert_eq!(paths(&inc.added), paths(&full.added));
    assert_eq!(paths(&inc.modified), paths(&full.modified));
    let mut inc_removed = inc.removed.clone();
    let mut full_removed = full.removed.clone();
    inc_removed.sort();
    full_removed.sort();
    assert_eq!(inc_removed, full_removed);
    assert_eq!(inc_removed, vec!["b.py".to_string()]);
}

#[test]
fn test_first_run_delegates_to_full_scan() {
    let tree = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let root = tree.path().canonicalize().unwrap();
    write(&root, "a.py", "x\n");

    let det = detector(&root, state.path(), &[]);
    let changes = det.incremental_scan().unwrap();
    assert!(changes.from_full_scan);
    assert_eq!(changes.added.len(), 1);
}

#[test]
fn test_touch_is_not_modified() {
    let tree = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let root = tree.path().canonicalize().unwrap();
    write(&root, "a.py", "same\n");

    let mut det = detector(&root, state.path(), &[]);
    let changes = det.full_scan().unwrap();
    commit(&mut det, changes);

    // Rewrite identical bytes: mtime moves, content does not.
    std::thread::sleep(Duration::from_millis(20));
    write(&root, "a.py", "same\n");

    let det = detector(&root, state.path(), &[])
        .with_full_scan_interval(Duration::from_secs(3600));
    let changes = det.incremental_scan().unwrap();
    assert!(changes.is_empty());
    assert_eq!(changes.touched.len(), 1);
}

#[test]
fn test_update_single_file_lifecycle() {
    let tree = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let root = tree.path().canonicalize().unwrap();

    let mut det = detector(&root, state.path(), &[]);

    // Absent and untracked: noop.
    let action = det.update_single_file(&root.join("a.py")).unwrap();
    assert_eq!(action.name(), "noop");

    // New file: added.
    write(&root, "a.py", "v1\n");
    let action = det.update_single_file(&root.join("a.py")).unwrap();
    assert_eq!(action.name(), "added");
    if let codesync::FileAction::Added(p) = action {
        det.store_mut().upsert(&p.path, p.hash, p.mtime_ms);
    }

    // Same content: noop.
    let action = det.update_single_file(&root.join("a.py")).unwrap();
    assert_eq!(action.name(), "noop");

    // Changed content: modified.
    write(&root, "a.py", "v2\n");
    let action = det.update_single_file(&root.join("a.py")).unwrap();
    assert_eq!(action.name(), "modified");

    // Deleted while tracked: removed.
    std::fs::remove_file(root.join("a.py")).unwrap();
    let action = det.update_single_file(&root.join("a.py")).unwrap();
    assert_eq!(action.name(), "removed");
}

#[test]
fn test_ignored_tracked_file_resolves_to_removed() {
    let tree = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let root = tree.path().canonicalize().unwrap();
    write(&root, "gen/out.py", "x\n");

    let mut det = detector(&root, state.path(), &[]);
    let changes = det.full_scan().unwrap();
    commit(&mut det, changes);
    assert!(det.store().contains("gen/out.py"));

    // The same path under a new ignore pattern is treated as gone.
    det.set_matcher(IgnoreMatcher::for_codebase(&root, &["gen/"]));
    let action = det.update_single_file(&root.join("gen/out.py")).unwrap();
    assert_eq!(action.name(), "removed");
}

#[cfg(unix)]
#[test]
fn test_symlinks_are_skipped() {
    let tree = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let root = tree.path().canonicalize().unwrap();

    write(&root, "real.py", "x\n");
    std::os::unix::fs::symlink(root.join("real.py"), root.join("link.py")).unwrap();

    let det = detector(&root, state.path(), &[]);
    let changes = det.full_scan().unwrap();

    let added: Vec<&str> = changes.added.iter().map(|p| p.path.as_str()).collect();
    assert_eq!(added, vec!["real.py"]);
}
