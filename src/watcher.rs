//! Real-time filesystem watcher
//!
//! Converts notify events into single-file sync workflows. Events are
//! filtered by the ignore matcher and the supported-extension list,
//! debounced per `(event, path)`, and held until writes look stable
//! before dispatch. Watcher errors are logged; the watcher stays active
//! until explicitly disabled.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use thiserror::Error;

use crate::ignore_rules::IgnoreMatcher;
use crate::sync::SyncController;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Filesystem watch failed: {0}")]
    Notify(#[from] notify::Error),
    #[error("Failed to start watcher thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Watcher tunables.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Per-`(event, path)` debounce window; a same-key event restarts it.
    pub debounce: Duration,
    /// How long a file must stop changing before add/change dispatches.
    pub stability_window: Duration,
    /// Tick interval for the debounce loop.
    pub poll_interval: Duration,
    /// Extensions (without the dot) the watcher emits for.
    pub extensions: HashSet<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            stability_window: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
            extensions: crate::chunker::supported_extensions()
                .into_iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Event kinds the sync core reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEvent {
    Add,
    Change,
    Unlink,
}

struct PendingOp {
    fire_at: Instant,
    event: FsEvent,
    last_meta: Option<(u64, SystemTime)>,
    stable_since: Instant,
}

type PendingMap = HashMap<(FsEvent, PathBuf), PendingOp>;

/// A running watcher for one codebase. Dropping or [`stop`]ping it cancels
/// all pending debounce timers.
///
/// [`stop`]: RealtimeWatcher::stop
pub struct RealtimeWatcher {
    pending: Arc<Mutex<PendingMap>>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl RealtimeWatcher {
    /// Subscribe to filesystem events under `root` and start the debounce
    /// loop. Fired events run the controller's single-file workflow.
    pub fn spawn(
        root: &Path,
        matcher: IgnoreMatcher,
        config: WatcherConfig,
        controller: Arc<SyncController>,
    ) -> Result<Self, WatcherError> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let root = root.to_path_buf();
            let pending = Arc::clone(&pending);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("codesync-watcher".into())
                .spawn(move || {
                    // Keep the subscription alive for the thread's lifetime.
                    let _watcher = watcher;
                    watch_loop(&root, &matcher, &config, &controller, &rx, &pending, &stop);
                    tracing::debug!(root = %root.display(), "Watcher stopped");
                })
                .map_err(WatcherError::Thread)?
        };

        tracing::info!(root = %root.display(), "Realtime sync enabled");
        Ok(Self {
            pending,
            stop,
            thread: Some(thread),
        })
    }

    /// Debounced operations not yet dispatched.
    pub fn pending_ops(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Cancel pending timers and stop the event loop.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RealtimeWatcher {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

fn watch_loop(
    root: &Path,
    matcher: &IgnoreMatcher,
    config: &WatcherConfig,
    controller: &Arc<SyncController>,
    rx: &mpsc::Receiver<Result<notify::Event, notify::Error>>,
    pending: &Arc<Mutex<PendingMap>>,
    stop: &Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }

        match rx.recv_timeout(config.poll_interval) {
            Ok(Ok(event)) => {
                if let Some(kind) = classify(&event.kind) {
                    for path in event.paths {
                        enqueue(root, matcher, config, pending, kind, path);
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Watch error");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::warn!("Watch channel disconnected; realtime sync stopped");
                return;
            }
        }

        dispatch_ready(config, controller, pending, stop);
    }
}

fn classify(kind: &EventKind) -> Option<FsEvent> {
    match kind {
        EventKind::Create(_) => Some(FsEvent::Add),
        EventKind::Modify(_) => Some(FsEvent::Change),
        EventKind::Remove(_) => Some(FsEvent::Unlink),
        _ => None,
    }
}

/// Filter an event and (re)arm its debounce timer. A same-key event within
/// the window replaces the previous pending op, restarting the timer.
fn enqueue(
    root: &Path,
    matcher: &IgnoreMatcher,
    config: &WatcherConfig,
    pending: &Arc<Mutex<PendingMap>>,
    event: FsEvent,
    path: PathBuf,
) {
    if !path.starts_with(root) {
        return;
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if !config.extensions.contains(extension) {
        return;
    }
    if matcher.is_ignored(&path) {
        return;
    }
    // Regular files only; unlink can no longer be stat'd.
    if event != FsEvent::Unlink {
        let is_file = std::fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            return;
        }
    }

    let now = Instant::now();
    let mut map = pending.lock().unwrap_or_else(|e| e.into_inner());
    map.insert(
        (event, path),
        PendingOp {
            fire_at: now + config.debounce,
            event,
            last_meta: None,
            stable_since: now,
        },
    );
}

/// Fire pending ops whose debounce expired and whose writes look stable.
fn dispatch_ready(
    config: &WatcherConfig,
    controller: &Arc<SyncController>,
    pending: &Arc<Mutex<PendingMap>>,
    stop: &Arc<AtomicBool>,
) {
    let now = Instant::now();
    let ready: Vec<PathBuf> = {
        let mut map = pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut fired = Vec::new();
        map.retain(|(_, path), op| {
            if now < op.fire_at {
                return true;
            }
            if op.event != FsEvent::Unlink {
                match std::fs::metadata(path) {
                    Ok(meta) => {
                        let current = (
                            meta.len(),
                            meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                        );
                        if op.last_meta != Some(current) {
                            // Still being written; restart the stability clock.
                            op.last_meta = Some(current);
                            op.stable_since = now;
                            return true;
                        }
                        if now.duration_since(op.stable_since) < config.stability_window {
                            return true;
                        }
                    }
                    // File vanished between event and dispatch; the
                    // single-file workflow resolves it as removed.
                    Err(_) => {}
                }
            }
            fired.push(path.clone());
            false
        });
        fired
    };

    for path in ready {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        match controller.sync_file(&path) {
            Ok(report) => {
                tracing::debug!(
                    path = %path.display(),
                    action = report.action,
                    duration_ms = report.duration_ms,
                    "Watcher dispatched file sync"
                );
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Watcher file sync failed");
            }
        }
    }
}
