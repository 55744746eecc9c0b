//! MCP server core
//!
//! Handles JSON-RPC requests and coordinates tool execution against the
//! shared [`Service`].

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::service::Service;

use super::tools;
use super::types::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerCapabilities,
    ServerInfo, ToolsCapability,
};

/// MCP protocol version.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer {
    pub(crate) service: Arc<Service>,
}

impl McpServer {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }

    /// Handle a JSON-RPC request. Takes `&self`; tool handlers serialize
    /// through the per-codebase controllers, not through the server.
    pub fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "initialized" => Ok(Value::Null),
            "tools/list" => tools::handle_tools_list(),
            "tools/call" => tools::handle_tools_call(self, request.params),
            _ => Err(anyhow::anyhow!("Unknown method: {}", request.method)),
        };

        match result {
            Ok(value) => JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: request.id,
                result: Some(value),
                error: None,
            },
            Err(e) => {
                tracing::debug!(error = %e, method = %request.method, "Request error");
                JsonRpcResponse {
                    jsonrpc: "2.0".into(),
                    id: request.id,
                    result: None,
                    error: Some(JsonRpcError {
                        code: -32000,
                        message: e.to_string(),
                        data: None,
                    }),
                }
            }
        }
    }

    fn handle_initialize(&self) -> Result<Value> {
        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.into(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "codesync".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };
        Ok(serde_json::to_value(result)?)
    }
}
