//! Tool handlers
//!
//! One closed set of operations; dispatch is a single exhaustive match.

mod health;
mod index;
mod search;
mod sync;

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::{json, Value};

use super::server::McpServer;
use super::types::{Tool, ToolsListResult};

/// Wrap a serializable payload in the MCP content-array result format.
pub(crate) fn text_result<T: Serialize>(payload: &T) -> Result<Value> {
    let text = serde_json::to_string_pretty(payload)?;
    Ok(json!({ "content": [{ "type": "text", "text": text }] }))
}

/// Plain acknowledgement message.
pub(crate) fn message_result(message: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": message.into() }] })
}

/// Structured tool failure: the transport call succeeds, `isError` is set.
pub(crate) fn error_result(message: impl Into<String>) -> Value {
    json!({
        "content": [{ "type": "text", "text": message.into() }],
        "isError": true,
    })
}

fn path_schema() -> Value {
    json!({
        "type": "string",
        "description": "Absolute path to the codebase root"
    })
}

/// Handle `tools/list`.
pub fn handle_tools_list() -> Result<Value> {
    let tools = vec![
        Tool {
            name: "index_codebase".into(),
            description: "Index a codebase for semantic search. Runs in the background; poll get_indexing_status for progress.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": path_schema(),
                    "force": {
                        "type": "boolean",
                        "description": "Drop and rebuild an existing index",
                        "default": false
                    },
                    "splitter": {
                        "type": "string",
                        "enum": ["ast", "langchain"],
                        "description": "Code splitter (langchain falls back to ast)",
                        "default": "ast"
                    },
                    "custom_extensions": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Extra file extensions to watch, e.g. ['.vue']"
                    },
                    "ignore_patterns": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Additional ignore patterns (gitignore-style)"
                    }
                },
                "required": ["path"]
            }),
        },
        Tool {
            name: "search_code".into(),
            description: "Hybrid semantic + keyword search over an indexed codebase. A freshness check may reindex changed files first.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": path_schema(),
                    "query": {
                        "type": "string",
                        "description": "Natural language description of the code to find"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results (default 10, max 50)",
                        "default": 10
                    },
                    "extension_filter": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Restrict to extensions, e.g. ['.py', '.ts']"
                    }
                },
                "required": ["path", "query"]
            }),
        },
        Tool {
            name: "clear_index".into(),
            description: "Drop the collection and local snapshots for a codebase.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_schema() },
                "required": ["path"]
            }),
        },
        Tool {
            name: "get_indexing_status".into(),
            description: "Current index status: progress while indexing, file/chunk counts once done.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_schema() },
                "required": ["path"]
            }),
        },
        Tool {
            name: "enable_realtime_sync".into(),
            description: "Watch the codebase and sync file changes into the index as they happen.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_schema() },
                "required": ["path"]
            }),
        },
        Tool {
            name: "disable_realtime_sync".into(),
            description: "Stop watching the codebase; pending debounced events are cancelled.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_schema() },
                "required": ["path"]
            }),
        },
        Tool {
            name: "get_realtime_sync_status".into(),
            description: "Watcher state for one codebase, or all codebases when path is omitted.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_schema() }
            }),
        },
        Tool {
            name: "get_sync_status".into(),
            description: "Detailed sync state: status, tracked files, mtime cache, last full scan.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_schema() },
                "required": ["path"]
            }),
        },
        Tool {
            name: "sync_now".into(),
            description: "Run an incremental sync immediately; returns added/modified/removed counts.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_schema() },
                "required": ["path"]
            }),
        },
        Tool {
            name: "get_performance_stats".into(),
            description: "Counters: cache entries, pending watcher ops, pooled connections.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_schema() }
            }),
        },
        Tool {
            name: "health_check".into(),
            description: "Health report with issues and warnings, per codebase or global.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_schema() }
            }),
        },
        Tool {
            name: "get_sync_history".into(),
            description: "Recent sync audit entries (trigger, counts, duration), newest first.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": path_schema(),
                    "limit": {
                        "type": "integer",
                        "description": "Entries to return (default 10, max 50)",
                        "default": 10
                    }
                }
            }),
        },
    ];

    Ok(serde_json::to_value(ToolsListResult { tools })?)
}

/// Handle `tools/call`: parse, dispatch, and fold handler errors into
/// structured `isError` results.
pub fn handle_tools_call(server: &McpServer, params: Option<Value>) -> Result<Value> {
    let params = params.unwrap_or(Value::Null);
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let Some(name) = name else {
        bail!("tools/call requires a tool name");
    };
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let outcome = match name.as_str() {
        "index_codebase" => index::tool_index_codebase(server, arguments),
        "search_code" => search::tool_search_code(server, arguments),
        "clear_index" => index::tool_clear_index(server, arguments),
        "get_indexing_status" => index::tool_get_indexing_status(server, arguments),
        "enable_realtime_sync" => sync::tool_enable_realtime(server, arguments),
        "disable_realtime_sync" => sync::tool_disable_realtime(server, arguments),
        "get_realtime_sync_status" => sync::tool_realtime_status(server, arguments),
        "get_sync_status" => sync::tool_sync_status(server, arguments),
        "sync_now" => sync::tool_sync_now(server, arguments),
        "get_performance_stats" => health::tool_performance_stats(server, arguments),
        "health_check" => health::tool_health_check(server, arguments),
        "get_sync_history" => sync::tool_sync_history(server, arguments),
        other => bail!("Unknown tool: {}", other),
    };

    match outcome {
        Ok(value) => Ok(value),
        Err(e) => Ok(error_result(e.to_string())),
    }
}
