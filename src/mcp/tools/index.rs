//! Index lifecycle tools

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use crate::registry::CodebaseStatus;
use crate::service::IndexOptions;

use super::super::server::McpServer;
use super::super::types::{IndexArgs, PathArgs};
use super::super::validation::parse_splitter;
use super::{message_result, text_result};

/// Kick off workflow A in the background and acknowledge immediately.
pub fn tool_index_codebase(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: IndexArgs = serde_json::from_value(arguments)?;
    let options = IndexOptions {
        force: args.force.unwrap_or(false),
        splitter: parse_splitter(args.splitter.as_deref())?,
        custom_extensions: args.custom_extensions.unwrap_or_default(),
        ignore_patterns: args.ignore_patterns.unwrap_or_default(),
    };

    let codebase = server.service.ensure_codebase(Path::new(&args.path), &options)?;

    let status = server.service.registry.statuses.get(&codebase.root);
    if status.is_indexing() {
        return Ok(message_result(format!(
            "Indexing of {} is already in progress.",
            codebase.root.display()
        )));
    }

    // Capacity is a final answer, not an error: the host should not retry.
    if !codebase.controller.store().check_collection_limit()? {
        return Ok(message_result(
            "The vector store has reached its collection limit. Clear an \
             existing index before indexing another codebase.",
        ));
    }

    let service = Arc::clone(&server.service);
    let root = codebase.root.clone();
    let force = options.force;
    std::thread::Builder::new()
        .name("codesync-index".into())
        .spawn(move || {
            let Ok(codebase) = service.codebase(&root) else {
                return;
            };
            match codebase.controller.index(force, None) {
                Ok(stats) => {
                    tracing::info!(
                        root = %root.display(),
                        files = stats.indexed_files,
                        chunks = stats.total_chunks,
                        "Background index finished"
                    );
                    if service.config.realtime_sync.auto_enable {
                        if let Err(e) = service.enable_realtime(&root) {
                            tracing::warn!(error = %e, "Failed to auto-enable realtime sync");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Background index failed");
                }
            }
        })?;

    Ok(message_result(format!(
        "Indexing of {} started in the background. Poll get_indexing_status for progress.",
        codebase.root.display()
    )))
}

pub fn tool_clear_index(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: PathArgs = serde_json::from_value(arguments)?;
    server.service.clear(Path::new(&args.path))?;
    Ok(message_result(format!("Cleared index for {}.", args.path)))
}

pub fn tool_get_indexing_status(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: PathArgs = serde_json::from_value(arguments)?;
    let status = server.service.status(Path::new(&args.path))?;

    let payload = match status {
        CodebaseStatus::NotIndexed => json!({ "status": "notindexed" }),
        CodebaseStatus::Indexing { progress } => json!({
            "status": "indexing",
            "progress": progress,
        }),
        CodebaseStatus::Indexed {
            indexed_files,
            total_chunks,
            last_updated,
            outcome,
        } => json!({
            "status": "indexed",
            "files": indexed_files,
            "chunks": total_chunks,
            "last_updated": last_updated.to_rfc3339(),
            "outcome": outcome,
        }),
        CodebaseStatus::Failed {
            error,
            last_progress,
        } => json!({
            "status": "indexfailed",
            "error": error,
            "progress": last_progress,
        }),
    };
    text_result(&payload)
}
