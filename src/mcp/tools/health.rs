//! Health and performance tools

use std::path::Path;

use anyhow::Result;
use serde_json::{json, Value};

use crate::health::{check_codebase, check_global, perf_counters};

use super::super::server::McpServer;
use super::super::types::OptionalPathArgs;
use super::text_result;

pub fn tool_health_check(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: OptionalPathArgs = serde_json::from_value(arguments)?;
    let report = match args.path {
        Some(path) => {
            let codebase = server.service.codebase(Path::new(&path))?;
            check_codebase(&codebase, &server.service.registry)
        }
        None => check_global(&server.service.registry, &server.service.pool),
    };
    text_result(&report)
}

pub fn tool_performance_stats(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: OptionalPathArgs = serde_json::from_value(arguments)?;
    match args.path {
        Some(path) => {
            let codebase = server.service.codebase(Path::new(&path))?;
            text_result(&json!({
                "path": path,
                "counters": codebase.controller.counters(),
                "pending_ops": codebase.pending_ops(),
            }))
        }
        None => {
            let counters = perf_counters(&server.service.registry, &server.service.pool);
            text_result(&counters)
        }
    }
}
