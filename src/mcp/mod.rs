//! MCP tool surface
//!
//! JSON-RPC 2.0 server exposing the sync engine as tools, served over
//! stdio. Tool failures are returned as structured results with an
//! `isError` flag, never as transport-level failures.

pub mod server;
pub mod tools;
pub mod transports;
pub mod types;
pub mod validation;

pub use server::McpServer;
pub use transports::stdio::serve_stdio;
