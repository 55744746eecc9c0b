//! End-to-end sync scenarios over the embedded engine.

mod common;

use codesync::audit::SyncTrigger;
use codesync::registry::IndexOutcome;
use codesync::service::IndexOptions;
use codesync::CodebaseStatus;
use common::{test_config, TestHarness};

#[test]
fn test_index_then_modify() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    h.write("b.py", "print(2)\n");

    let stats = h.index();
    assert_eq!(stats.indexed_files, 2);
    assert_eq!(stats.outcome, IndexOutcome::Ok);
    assert!(matches!(
        h.service.status(h.root()).unwrap(),
        CodebaseStatus::Indexed { indexed_files: 2, .. }
    ));

    // Modify one file and sync.
    std::thread::sleep(std::time::Duration::from_millis(20));
    h.write("a.py", "print(11)\n");
    let report = h.codebase().controller.sync(SyncTrigger::Manual).unwrap();
    assert_eq!(report.counts.added, 0);
    assert_eq!(report.counts.modified, 1);
    assert_eq!(report.counts.removed, 0);

    // The top result for the new content points at a.py lines 1-1.
    let response = h
        .service
        .search(h.root(), "print(11)", 10, vec![])
        .unwrap();
    assert!(!response.results.is_empty());
    let top = &response.results[0];
    assert_eq!(top.relative_path, "a.py");
    assert_eq!(top.start_line, 1);
    assert_eq!(top.end_line, 1);
    assert!(top.content.contains("print(11)"));
}

#[test]
fn test_sync_with_no_changes_is_zero() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    h.index();

    let report = h.codebase().controller.sync(SyncTrigger::Manual).unwrap();
    assert_eq!(report.counts.added, 0);
    assert_eq!(report.counts.modified, 0);
    assert_eq!(report.counts.removed, 0);
    // No-op syncs do not pollute the audit ring.
    assert_eq!(h.codebase().controller.audit.len(), 1); // the index itself
}

#[test]
fn test_force_reindex_rebuilds() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    h.write("b.py", "print(2)\n");
    h.index();

    // Byte-identical rewrite, then a forced rebuild.
    h.write("a.py", "print(1)\n");
    let codebase = h.codebase();
    let stats = codebase.controller.index(true, None).unwrap();
    assert_eq!(stats.indexed_files, 2);
    assert_eq!(stats.outcome, IndexOutcome::Ok);
    assert!(matches!(
        h.service.status(h.root()).unwrap(),
        CodebaseStatus::Indexed { indexed_files: 2, .. }
    ));

    // The rebuilt collection still serves results.
    let response = h.service.search(h.root(), "print(2)", 5, vec![]).unwrap();
    assert!(response
        .results
        .iter()
        .any(|r| r.relative_path == "b.py"));
}

#[test]
fn test_ignore_patterns_exclude_subtree() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");

    let codebase = h
        .service
        .ensure_codebase(
            h.root(),
            &IndexOptions {
                ignore_patterns: vec!["build/".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
    codebase.controller.index(false, None).unwrap();

    // A new file under the ignored directory is invisible to sync.
    h.write("build/out.map", "sourcemap\n");
    let report = codebase.controller.sync(SyncTrigger::Manual).unwrap();
    assert_eq!(report.counts.added, 0);

    // Without the pattern it is reported as added.
    codebase
        .controller
        .set_matcher(codesync::IgnoreMatcher::for_codebase(h.root(), &[] as &[&str]));
    let report = codebase.controller.sync(SyncTrigger::Manual).unwrap();
    assert_eq!(report.counts.added, 1);
}

#[test]
fn test_chunk_budget_marks_limit_reached() {
    let mut config = test_config();
    config.chunk_budget = 10;
    let h = TestHarness::with_config(config);

    // 25 single-chunk files.
    for i in 0..25 {
        h.write(&format!("f{:02}.py", i), &format!("value = {}\n", i));
    }

    let stats = h.index();
    assert_eq!(stats.outcome, IndexOutcome::LimitReached);
    assert_eq!(stats.total_chunks, 10);

    match h.service.status(h.root()).unwrap() {
        CodebaseStatus::Indexed {
            total_chunks,
            outcome,
            ..
        } => {
            assert_eq!(total_chunks, 10);
            assert_eq!(outcome, IndexOutcome::LimitReached);
        }
        other => panic!("expected indexed status, got {:?}", other),
    }
}

#[test]
fn test_freshness_gate_caches_within_ttl() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    h.index();

    let first = h.codebase().controller.check_and_maybe_sync();
    assert!(!first.from_cache);

    let second = h.codebase().controller.check_and_maybe_sync();
    assert!(second.from_cache);
    assert!(!second.had_changes);
}

#[test]
fn test_search_triggers_catchup_sync() {
    let h = TestHarness::new();
    h.write("a.py", "alpha_marker\n");
    h.write("b.py", "beta_marker\n");
    h.index();

    // Delete b.py and search for its content without an explicit sync:
    // the freshness gate reindexes first, so no stale chunk surfaces.
    h.remove("b.py");
    let response = h
        .service
        .search(h.root(), "beta_marker", 10, vec![])
        .unwrap();
    assert!(response
        .results
        .iter()
        .all(|r| r.relative_path != "b.py"));

    // And the new state is durable: a.py is still found.
    let response = h
        .service
        .search(h.root(), "alpha_marker", 10, vec![])
        .unwrap();
    assert_eq!(response.results[0].relative_path, "a.py");
}

#[test]
fn test_search_unindexed_codebase_errors() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");

    let err = h
        .service
        .search(h.root(), "anything", 5, vec![])
        .unwrap_err();
    assert!(err.to_string().contains("not indexed"));
}

#[test]
fn test_clear_resets_everything() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    h.index();

    h.service.clear(h.root()).unwrap();
    assert_eq!(
        h.service.status(h.root()).unwrap(),
        CodebaseStatus::NotIndexed
    );
    assert!(h.service.search(h.root(), "print", 5, vec![]).is_err());
}

#[test]
fn test_reindex_after_clear() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    h.index();
    h.service.clear(h.root()).unwrap();

    let stats = h.index();
    assert_eq!(stats.indexed_files, 1);
    let response = h.service.search(h.root(), "print", 5, vec![]).unwrap();
    assert_eq!(response.results.len(), 1);
}

#[test]
fn test_extension_filter_narrows_results() {
    let h = TestHarness::new();
    h.write("a.py", "shared_token_here\n");
    h.write("b.rs", "shared_token_here\n");
    h.index();

    let response = h
        .service
        .search(h.root(), "shared_token_here", 10, vec![".rs".to_string()])
        .unwrap();
    assert!(!response.results.is_empty());
    assert!(response
        .results
        .iter()
        .all(|r| r.relative_path.ends_with(".rs")));
}

#[test]
fn test_audit_history_records_triggers() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    h.index();

    std::thread::sleep(std::time::Duration::from_millis(20));
    h.write("a.py", "print(2)\n");
    h.codebase().controller.sync(SyncTrigger::Manual).unwrap();

    let entries = h.codebase().controller.audit.recent(10);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].operation, "incremental_sync");
    assert_eq!(entries[0].trigger, SyncTrigger::Manual);
    assert_eq!(entries[0].modified, 1);
    assert_eq!(entries[1].operation, "full_index");
}
