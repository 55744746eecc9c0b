//! Tool surface tests: dispatch, validation, and a full index→search
//! round trip through JSON-RPC.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use codesync::mcp::types::{JsonRpcRequest, JsonRpcResponse};
use codesync::mcp::McpServer;
use serde_json::{json, Value};

use common::TestHarness;

fn call(server: &McpServer, method: &str, params: Value) -> JsonRpcResponse {
    server.handle_request(JsonRpcRequest {
        jsonrpc: "2.0".into(),
        id: Some(json!(1)),
        method: method.into(),
        params: Some(params),
    })
}

fn call_tool(server: &McpServer, name: &str, arguments: Value) -> Value {
    let response = call(
        server,
        "tools/call",
        json!({ "name": name, "arguments": arguments }),
    );
    assert!(response.error.is_none(), "tool call became transport error");
    response.result.expect("tool result")
}

fn result_text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().expect("text content")
}

fn is_error(result: &Value) -> bool {
    result["isError"].as_bool().unwrap_or(false)
}

#[test]
fn test_tools_list_is_complete() {
    let h = TestHarness::new();
    let server = McpServer::new(Arc::clone(&h.service));

    let response = call(&server, "tools/list", json!({}));
    let result = response.result.unwrap();
    let names: Vec<&str> = result["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();

    for expected in [
        "index_codebase",
        "search_code",
        "clear_index",
        "get_indexing_status",
        "enable_realtime_sync",
        "disable_realtime_sync",
        "get_realtime_sync_status",
        "get_sync_status",
        "sync_now",
        "get_performance_stats",
        "health_check",
        "get_sync_history",
    ] {
        assert!(names.contains(&expected), "missing tool {}", expected);
    }
    assert_eq!(names.len(), 12);
}

#[test]
fn test_relative_path_is_input_error() {
    let h = TestHarness::new();
    let server = McpServer::new(Arc::clone(&h.service));

    let result = call_tool(
        &server,
        "index_codebase",
        json!({ "path": "relative/dir" }),
    );
    assert!(is_error(&result));
    assert!(result_text(&result).contains("absolute"));
}

#[test]
fn test_missing_directory_is_input_error() {
    let h = TestHarness::new();
    let server = McpServer::new(Arc::clone(&h.service));

    let result = call_tool(
        &server,
        "index_codebase",
        json!({ "path": "/no/such/directory/exists" }),
    );
    assert!(is_error(&result));
    assert!(result_text(&result).contains("does not exist"));
}

#[test]
fn test_bad_extension_filter_is_input_error() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    let server = McpServer::new(Arc::clone(&h.service));

    let result = call_tool(
        &server,
        "search_code",
        json!({
            "path": h.root().display().to_string(),
            "query": "anything",
            "extension_filter": ["py"]
        }),
    );
    assert!(is_error(&result));
    assert!(result_text(&result).contains("extension"));
}

#[test]
fn test_unknown_splitter_is_input_error() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    let server = McpServer::new(Arc::clone(&h.service));

    let result = call_tool(
        &server,
        "index_codebase",
        json!({
            "path": h.root().display().to_string(),
            "splitter": "regex"
        }),
    );
    assert!(is_error(&result));
    assert!(result_text(&result).contains("splitter"));
}

#[test]
fn test_unknown_tool_is_transport_error() {
    let h = TestHarness::new();
    let server = McpServer::new(Arc::clone(&h.service));

    let response = call(
        &server,
        "tools/call",
        json!({ "name": "fly_to_the_moon", "arguments": {} }),
    );
    assert!(response.error.is_some());
}

#[test]
fn test_index_search_round_trip() {
    let h = TestHarness::new();
    h.write("math.py", "def fibonacci(n):\n    return n\n");
    h.write("io.py", "def read_config(path):\n    return path\n");
    let server = McpServer::new(Arc::clone(&h.service));
    let path = h.root().display().to_string();

    // Kick off the background index.
    let ack = call_tool(&server, "index_codebase", json!({ "path": path }));
    assert!(!is_error(&ack));
    assert!(result_text(&ack).contains("background"));

    // Poll status until indexed.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = call_tool(&server, "get_indexing_status", json!({ "path": path }));
        let parsed: Value = serde_json::from_str(result_text(&status)).unwrap();
        if parsed["status"] == "indexed" {
            assert_eq!(parsed["files"], 2);
            break;
        }
        assert!(Instant::now() < deadline, "index never completed");
        std::thread::sleep(Duration::from_millis(50));
    }

    // Search through the tool surface.
    let result = call_tool(
        &server,
        "search_code",
        json!({ "path": path, "query": "fibonacci", "limit": 5 }),
    );
    assert!(!is_error(&result));
    let parsed: Value = serde_json::from_str(result_text(&result)).unwrap();
    let results = parsed["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["relativePath"], "math.py");
    assert_eq!(results[0]["language"], "python");

    // Sync reports zero drift, and history holds the index entry.
    let sync = call_tool(&server, "sync_now", json!({ "path": path }));
    let parsed: Value = serde_json::from_str(result_text(&sync)).unwrap();
    assert_eq!(parsed["added"], 0);
    assert_eq!(parsed["modified"], 0);
    assert_eq!(parsed["removed"], 0);

    let history = call_tool(&server, "get_sync_history", json!({ "path": path }));
    let parsed: Value = serde_json::from_str(result_text(&history)).unwrap();
    assert!(parsed["total"].as_u64().unwrap() >= 1);
}

#[test]
fn test_status_and_health_tools() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    h.index();
    let server = McpServer::new(Arc::clone(&h.service));
    let path = h.root().display().to_string();

    let status = call_tool(&server, "get_sync_status", json!({ "path": path }));
    let parsed: Value = serde_json::from_str(result_text(&status)).unwrap();
    assert_eq!(parsed["status"]["status"], "indexed");
    assert_eq!(parsed["realtime"]["enabled"], false);

    let health = call_tool(&server, "health_check", json!({ "path": path }));
    let parsed: Value = serde_json::from_str(result_text(&health)).unwrap();
    assert!(parsed["issues"].as_array().unwrap().is_empty());

    let global = call_tool(&server, "health_check", json!({}));
    let parsed: Value = serde_json::from_str(result_text(&global)).unwrap();
    assert!(parsed["issues"].as_array().unwrap().is_empty());

    let perf = call_tool(&server, "get_performance_stats", json!({}));
    let parsed: Value = serde_json::from_str(result_text(&perf)).unwrap();
    assert_eq!(parsed["codebases"], 1);
}

#[test]
fn test_search_before_index_reports_not_indexed() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    let server = McpServer::new(Arc::clone(&h.service));

    let result = call_tool(
        &server,
        "search_code",
        json!({
            "path": h.root().display().to_string(),
            "query": "print"
        }),
    );
    assert!(is_error(&result));
    assert!(result_text(&result).contains("not indexed"));
}

#[test]
fn test_clear_index_tool() {
    let h = TestHarness::new();
    h.write("a.py", "print(1)\n");
    h.index();
    let server = McpServer::new(Arc::clone(&h.service));
    let path = h.root().display().to_string();

    let result = call_tool(&server, "clear_index", json!({ "path": path }));
    assert!(!is_error(&result));

    let status = call_tool(&server, "get_indexing_status", json!({ "path": path }));
    let parsed: Value = serde_json::from_str(result_text(&status)).unwrap();
    assert_eq!(parsed["status"], "notindexed");
}
