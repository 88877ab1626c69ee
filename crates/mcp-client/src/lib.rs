//! `tl-mcp-client`: MCP (Model Context Protocol) client for toollink.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for communicating with MCP servers.
//! - Stdio and streamable-HTTP transports behind one [`McpTransport`] trait.
//! - [`McpConnection`], which owns a single server's connection lifecycle:
//!   lazy, mutually exclusive connects, idle teardown, tool discovery, and a
//!   call path that always returns a [`ToolCallResult`].
//! - [`ToolWrapper`]s that expose discovered tools as local operations.
//! - [`McpRegistry`], a name → connection map for callers with many servers.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tl_mcp_client::{ConnectionOptions, McpConnection, ServerConfig};
//!
//! let conn = McpConnection::new(
//!     "filesystem",
//!     ServerConfig::stdio("npx", vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into()]),
//!     ConnectionOptions::default(),
//! )?;
//!
//! // Connects on first use; failures come back as `is_error` results.
//! let result = conn.call_tool("read_file", json!({ "path": "/tmp/test.txt" })).await;
//! println!("{}", result.text());
//! ```

pub mod call;
pub mod config;
pub mod connection;
pub mod debounce;
pub mod error;
pub mod locker;
pub mod protocol;
pub mod registry;
mod sse;
pub mod transport;
pub mod wrapper;

// Re-exports for convenience.
pub use config::{ConnectionOptions, McpConfig, McpServerEntry, ServerConfig};
pub use connection::{ConnectionState, McpConnection, ServerInfo, ServerStatus, Session};
pub use error::McpError;
pub use protocol::{ToolCallResult, ToolContent, ToolDescriptor};
pub use registry::McpRegistry;
pub use transport::{McpTransport, TransportError, TransportFactory, TransportPolicy};
pub use wrapper::{ToolWrapper, WrapperError};
