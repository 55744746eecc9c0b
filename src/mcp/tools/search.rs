//! Search tool

use std::path::Path;

use anyhow::Result;
use serde_json::{json, Value};

use super::super::server::McpServer;
use super::super::types::SearchArgs;
use super::super::validation::{clamp_limit, validate_extension_filter, validate_query};
use super::text_result;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

pub fn tool_search_code(server: &McpServer, arguments: Value) -> Result<Value> {
    let args: SearchArgs = serde_json::from_value(arguments)?;
    validate_query(&args.query)?;
    let extension_filter = args.extension_filter.unwrap_or_default();
    validate_extension_filter(&extension_filter)?;
    let limit = clamp_limit(args.limit, DEFAULT_LIMIT, MAX_LIMIT);

    let response =
        server
            .service
            .search(Path::new(&args.path), &args.query, limit, extension_filter)?;

    let mut payload = json!({
        "results": response.results,
        "total": response.results.len(),
    });
    if response.incomplete {
        payload["note"] =
            json!("Indexing is still in progress; results may be incomplete.");
    }
    text_result(&payload)
}
