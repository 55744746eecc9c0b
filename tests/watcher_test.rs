//! Realtime watcher scenarios. Timing-sensitive: generous windows, poll
//! loops instead of fixed sleeps wherever possible.

mod common;

use std::time::{Duration, Instant};

use codesync::audit::SyncTrigger;
use serial_test::serial;

use common::{test_config, TestHarness};

/// Poll until `pred` holds or the timeout elapses.
fn wait_for(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    pred()
}

#[test]
#[serial]
fn test_realtime_delete_reaches_index() {
    let h = TestHarness::new();
    h.write("a.py", "alpha_unique_token\n");
    h.write("b.py", "beta_unique_token\n");
    h.index();
    h.service.enable_realtime(h.root()).unwrap();

    h.remove("b.py");

    // The unlink debounces (500 ms) and then lands in the store.
    let synced = wait_for(Duration::from_secs(5), || {
        h.codebase()
            .controller
            .audit
            .recent(10)
            .iter()
            .any(|e| e.trigger == SyncTrigger::Realtime && e.removed == 1)
    });
    assert!(synced, "unlink was never dispatched");

    // Search with the gate disabled so only the watcher's work shows.
    h.service.gate.set_enabled(false);
    let response = h
        .service
        .search(h.root(), "beta_unique_token", 10, vec![])
        .unwrap();
    assert!(response
        .results
        .iter()
        .all(|r| r.relative_path != "b.py"));

    h.service.disable_realtime(h.root()).unwrap();
}

#[test]
#[serial]
fn test_realtime_change_coalesces_bursts() {
    let mut config = test_config();
    config.realtime_sync.debounce_ms = 300;
    let h = TestHarness::with_config(config);
    h.write("a.py", "v0\n");
    h.index();
    h.service.enable_realtime(h.root()).unwrap();

    // A save + auto-format storm: several writes inside one debounce
    // window.
    for i in 1..=4 {
        h.write("a.py", &format!("v{}\n", i));
        std::thread::sleep(Duration::from_millis(40));
    }

    // Wait out debounce + stability, then give the dispatcher room.
    let synced = wait_for(Duration::from_secs(6), || {
        h.codebase()
            .controller
            .audit
            .recent(50)
            .iter()
            .any(|e| e.trigger == SyncTrigger::Realtime)
    });
    assert!(synced, "change was never dispatched");
    std::thread::sleep(Duration::from_millis(500));

    let realtime_entries = h
        .codebase()
        .controller
        .audit
        .recent(50)
        .iter()
        .filter(|e| e.trigger == SyncTrigger::Realtime)
        .count();
    assert_eq!(realtime_entries, 1, "burst must coalesce to one dispatch");

    // The final content won.
    h.service.gate.set_enabled(false);
    let response = h.service.search(h.root(), "v4", 10, vec![]).unwrap();
    assert!(response.results.iter().any(|r| r.content.contains("v4")));

    h.service.disable_realtime(h.root()).unwrap();
}

#[test]
fn test_disable_cancels_pending_ops() {
    let h = TestHarness::new();
    h.write("a.py", "x\n");
    h.index();
    h.service.enable_realtime(h.root()).unwrap();
    assert!(h.codebase().watcher_enabled());

    h.service.disable_realtime(h.root()).unwrap();
    assert!(!h.codebase().watcher_enabled());
    assert_eq!(h.codebase().pending_ops(), 0);
}

#[test]
fn test_enable_twice_is_idempotent() {
    let h = TestHarness::new();
    h.write("a.py", "x\n");
    h.index();
    h.service.enable_realtime(h.root()).unwrap();
    h.service.enable_realtime(h.root()).unwrap();
    assert!(h.codebase().watcher_enabled());
    h.service.disable_realtime(h.root()).unwrap();
}
