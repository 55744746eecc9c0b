//! Stdio transport
//!
//! Reads JSON-RPC requests from stdin, one per line, and writes responses
//! to stdout. Logging stays on stderr.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Result;

use crate::service::Service;

use super::super::server::McpServer;
use super::super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Run the MCP server over stdio until stdin closes.
pub fn serve_stdio(service: Arc<Service>) -> Result<()> {
    let server = McpServer::new(Arc::clone(&service));

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let response = JsonRpcResponse {
                    jsonrpc: "2.0".into(),
                    id: None,
                    result: None,
                    error: Some(JsonRpcError {
                        code: -32700,
                        message: format!("Parse error: {}", e),
                        data: None,
                    }),
                };
                writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
                stdout.flush()?;
                continue;
            }
        };

        let response = server.handle_request(request);

        // Notifications (no id) produce no response line.
        if response.id.is_none()
            && response
                .result
                .as_ref()
                .map(|v| v.is_null())
                .unwrap_or(false)
        {
            continue;
        }

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    service.shutdown();
    Ok(())
}
