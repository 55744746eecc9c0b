//! Sync control and inspection tools

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::audit::{AuditEntry, SyncTrigger};

use super::super::server::McpServer;
use super::super::types::{HistoryArgs, OptionalPathArgs, PathArgs};
use super::super::validation::clamp_limit;
use super::{message_result, text_result};

const HISTORY_DEFAULT: usize = 10;
const HISTORY_MAX: usize = 50;

pub fn tool_sync_now(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: PathArgs = serde_json::from_value(arguments)?;
    let codebase = server.service.codebase(Path::new(&args.path))?;
    let report = codebase.controller.sync(SyncTrigger::Manual)?;
    text_result(&report)
}

pub fn tool_enable_realtime(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: PathArgs = serde_json::from_value(arguments)?;
    server.service.enable_realtime(Path::new(&args.path))?;
    Ok(message_result(format!(
        "Realtime sync enabled for {}.",
        args.path
    )))
}

pub fn tool_disable_realtime(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: PathArgs = serde_json::from_value(arguments)?;
    server.service.disable_realtime(Path::new(&args.path))?;
    Ok(message_result(format!(
        "Realtime sync disabled for {}.",
        args.path
    )))
}

pub fn tool_realtime_status(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: OptionalPathArgs = serde_json::from_value(arguments)?;
    match args.path {
        Some(path) => {
            let codebase = server.service.codebase(Path::new(&path))?;
            text_result(&json!({
                "path": path,
                "enabled": codebase.watcher_enabled(),
                "pending_ops": codebase.pending_ops(),
            }))
        }
        None => {
            let all: Vec<Value> = server
                .service
                .registry
                .all()
                .iter()
                .map(|c| {
                    json!({
                        "path": c.root.display().to_string(),
                        "enabled": c.watcher_enabled(),
                        "pending_ops": c.pending_ops(),
                    })
                })
                .collect();
            text_result(&json!({ "codebases": all }))
        }
    }
}

pub fn tool_sync_status(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: PathArgs = serde_json::from_value(arguments)?;
    let codebase = server.service.codebase(Path::new(&args.path))?;
    let status = server.service.registry.statuses.get(&codebase.root);
    let counters = codebase.controller.counters();

    text_result(&json!({
        "path": args.path,
        "status": status,
        "collection": codebase.collection,
        "counters": counters,
        "realtime": {
            "enabled": codebase.watcher_enabled(),
            "pending_ops": codebase.pending_ops(),
        },
        "history_entries": codebase.controller.audit.len(),
    }))
}

pub fn tool_sync_history(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: HistoryArgs = serde_json::from_value(arguments)?;
    let limit = clamp_limit(args.limit, HISTORY_DEFAULT, HISTORY_MAX);

    let entries: Vec<AuditEntry> = match &args.path {
        Some(path) => {
            let codebase = server.service.codebase(Path::new(path))?;
            codebase.controller.audit.recent(limit)
        }
        None => {
            // Merge all codebases, newest first.
            let mut merged: Vec<(DateTime<Utc>, AuditEntry)> = server
                .service
                .registry
                .all()
                .iter()
                .flat_map(|c| {
                    c.controller
                        .audit
                        .recent(limit)
                        .into_iter()
                        .map(|e| (e.timestamp, e))
                })
                .collect();
            merged.sort_by(|a, b| b.0.cmp(&a.0));
            merged.truncate(limit);
            merged.into_iter().map(|(_, e)| e).collect()
        }
    };

    text_result(&json!({ "entries": entries, "total": entries.len() }))
}
