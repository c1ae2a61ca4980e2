//! unifai-mcp: platform services as MCP tools
//!
//! Serves `search_services` and `invoke_service` to any MCP client over
//! STDIO, backed by the same [`unifai_agent::Tools`] client the chat agent uses.

pub mod protocol;
pub mod server;

pub use server::McpServer;
