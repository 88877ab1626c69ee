use tl_domain::config::ConfigError;

use crate::transport::TransportError;

/// Errors specific to MCP connection management.
///
/// Only [`McpError::Config`] ever reaches a caller as a hard failure (from
/// [`McpConnection::new`](crate::McpConnection::new)); every other variant
/// is recorded on the connection and surfaced through its status fields.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("invalid MCP server config: {0}")]
    Config(#[from] ConfigError),

    #[error("stdio transport for \"{0}\" is disabled: only network transports are allowed")]
    TransportPolicy(String),

    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("failed to close MCP transport: {0}")]
    Close(TransportError),
}
