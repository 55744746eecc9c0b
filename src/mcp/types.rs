//! JSON-RPC and MCP protocol types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request
#[derive(Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

/// JSON-RPC response
#[derive(Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// MCP protocol types

#[derive(Serialize)]
pub(crate) struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Serialize)]
pub(crate) struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Serialize)]
pub(crate) struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Serialize)]
pub(crate) struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Serialize)]
pub(crate) struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Serialize)]
pub(crate) struct ToolsListResult {
    pub tools: Vec<Tool>,
}

// Tool argument structs. Absolute paths are required wherever `path` is.

#[derive(Deserialize)]
pub(crate) struct IndexArgs {
    pub path: String,
    pub force: Option<bool>,
    pub splitter: Option<String>,
    pub custom_extensions: Option<Vec<String>>,
    pub ignore_patterns: Option<Vec<String>>,
}

#[derive(Deserialize)]
pub(crate) struct SearchArgs {
    pub path: String,
    pub query: String,
    pub limit: Option<usize>,
    pub extension_filter: Option<Vec<String>>,
}

#[derive(Deserialize)]
pub(crate) struct PathArgs {
    pub path: String,
}

#[derive(Deserialize, Default)]
pub(crate) struct OptionalPathArgs {
    pub path: Option<String>,
}

#[derive(Deserialize, Default)]
pub(crate) struct HistoryArgs {
    pub path: Option<String>,
    pub limit: Option<usize>,
}
