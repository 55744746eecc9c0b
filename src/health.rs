//! Health checks and performance counters
//!
//! Per-codebase and global reports in the same shape: hard problems land
//! in `issues`, degradations in `warnings`.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::registry::{Codebase, Registry};
use crate::store::ConnectionPool;

/// Per-codebase pending-op level that warrants a warning.
const PENDING_OPS_WARN: usize = 10;

/// Global thresholds.
const CACHE_COUNT_WARN: usize = 50;
const TOTAL_PENDING_WARN: usize = 20;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Counters exposed through `get_performance_stats`.
#[derive(Debug, Serialize)]
pub struct PerfCounters {
    /// Codebases with a live freshness-cache entry.
    pub sync_cache_entries: usize,
    /// Debounced watcher operations not yet dispatched, across codebases.
    pub watcher_pending_ops: usize,
    /// Registered codebases.
    pub codebases: usize,
    /// `(address, refcount)` per pooled connection.
    pub pool_connections: Vec<(String, usize)>,
}

pub fn perf_counters(registry: &Registry, pool: &Arc<ConnectionPool>) -> PerfCounters {
    let codebases = registry.all();
    let sync_cache_entries = codebases
        .iter()
        .filter(|c| c.controller.counters().sync_cache_live)
        .count();
    let watcher_pending_ops = codebases.iter().map(|c| c.pending_ops()).sum();
    PerfCounters {
        sync_cache_entries,
        watcher_pending_ops,
        codebases: codebases.len(),
        pool_connections: pool.connection_counts(),
    }
}

/// Health of one codebase: path, index, synchronizer, caches, backlog.
pub fn check_codebase(codebase: &Codebase, registry: &Registry) -> HealthReport {
    let started = Instant::now();
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    if !codebase.root.exists() {
        issues.push(format!(
            "Codebase path no longer exists: {}",
            codebase.root.display()
        ));
    }

    let status = registry.statuses.get(&codebase.root);
    if !status.is_indexed() && !status.is_indexing() {
        issues.push("No index exists for this codebase".to_string());
    }

    let counters = codebase.controller.counters();
    if counters.busy {
        warnings.push("A sync workflow is currently running".to_string());
    } else if counters.mtime_cache_size == 0 && status.is_indexed() {
        warnings.push("Mtime cache is empty; next scan will rehash every file".to_string());
    }

    let pending = codebase.pending_ops();
    if pending > PENDING_OPS_WARN {
        warnings.push(format!(
            "{} pending watcher operations (threshold {})",
            pending, PENDING_OPS_WARN
        ));
    }

    HealthReport {
        issues,
        warnings,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Global health across every registered codebase.
pub fn check_global(registry: &Registry, pool: &Arc<ConnectionPool>) -> HealthReport {
    let started = Instant::now();
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    let counters = perf_counters(registry, pool);
    if counters.sync_cache_entries > CACHE_COUNT_WARN {
        warnings.push(format!(
            "{} live sync cache entries (threshold {})",
            counters.sync_cache_entries, CACHE_COUNT_WARN
        ));
    }
    if counters.watcher_pending_ops > TOTAL_PENDING_WARN {
        warnings.push(format!(
            "{} total pending watcher operations (threshold {})",
            counters.watcher_pending_ops, TOTAL_PENDING_WARN
        ));
    }

    let probe = registry.state_dir.join(".health_probe");
    match std::fs::create_dir_all(&registry.state_dir)
        .and_then(|_| std::fs::write(&probe, b"ok"))
    {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
        }
        Err(e) => {
            issues.push(format!(
                "State directory {} is not writable: {}",
                registry.state_dir.display(),
                e
            ));
        }
    }

    for codebase in registry.all() {
        let report = check_codebase(&codebase, registry);
        for issue in report.issues {
            issues.push(format!("{}: {}", codebase.root.display(), issue));
        }
    }

    HealthReport {
        issues,
        warnings,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
