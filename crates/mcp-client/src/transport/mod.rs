//! MCP transport layer.
//!
//! Each MCP server communicates over a transport:
//! - **Stdio**: spawn a child process, send JSON-RPC over stdin/stdout.
//! - **Stream**: POST JSON-RPC to an HTTP endpoint; answers arrive as JSON
//!   or as a server-sent event stream.
//!
//! [`build_transport`] is the only place that turns a [`ServerConfig`] into
//! a live channel.

mod stdio;
mod stream;

pub use stdio::{overlay_env, StdioTransport};
pub use stream::StreamTransport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use tl_domain::config::ServerConfig;

use crate::error::McpError;
use crate::protocol::JsonRpcResponse;

/// Trait for MCP server transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the corresponding response.
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError>;

    /// Check if the transport is still alive.
    fn is_alive(&self) -> bool;

    /// Shut down the transport. Errors are reported, never retried.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP server process has exited")]
    ProcessExited,

    #[error("response stream ended before the reply arrived")]
    StreamEnded,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: u64 },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("transport is closed")]
    Closed,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Request(e.without_url().to_string())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Global restriction on which transports may be built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportPolicy {
    /// Only network transports are allowed; stdio is refused before spawn.
    pub network_only: bool,
}

/// Builds a transport for one server.
///
/// Connections hold an `Arc<dyn TransportFactory>` so embedders can route
/// through their own channels (tests use scripted in-memory servers).
pub trait TransportFactory: Send + Sync {
    fn build(
        &self,
        server: &str,
        config: &ServerConfig,
        policy: TransportPolicy,
        request_timeout: Duration,
    ) -> Result<Arc<dyn McpTransport>, McpError>;
}

/// The factory used unless another one is supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn build(
        &self,
        server: &str,
        config: &ServerConfig,
        policy: TransportPolicy,
        request_timeout: Duration,
    ) -> Result<Arc<dyn McpTransport>, McpError> {
        build_transport(server, config, policy, request_timeout)
    }
}

/// Build the transport selected by the config's variant.
///
/// Stdio under a network-only policy fails with
/// [`McpError::TransportPolicy`] before any process is spawned.
pub fn build_transport(
    server: &str,
    config: &ServerConfig,
    policy: TransportPolicy,
    request_timeout: Duration,
) -> Result<Arc<dyn McpTransport>, McpError> {
    config.validate()?;

    match config {
        ServerConfig::Stdio(cfg) => {
            if policy.network_only {
                return Err(McpError::TransportPolicy(server.to_string()));
            }
            let transport = StdioTransport::spawn(server, cfg, request_timeout)?;
            Ok(Arc::new(transport))
        }
        ServerConfig::Stream(cfg) => {
            let transport = StreamTransport::new(server, cfg, request_timeout)?;
            Ok(Arc::new(transport))
        }
    }
}
