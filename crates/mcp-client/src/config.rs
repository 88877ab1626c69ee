//! MCP configuration types, re-exported from `tl-domain`, plus the
//! per-connection options derived from them.
//!
//! The canonical definitions live in `tl_domain::config` so embedders can
//! load and validate configuration without depending on this crate.

use std::time::Duration;

pub use tl_domain::config::{
    ConfigError, ConfigSeverity, McpConfig, McpServerEntry, ServerConfig, StdioServerConfig,
    StreamServerConfig,
};

use crate::transport::TransportPolicy;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every connection built from one [`McpConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Refuse stdio transports.
    pub network_only: bool,
    /// Inactivity window before the connection is torn down. `None`
    /// keeps connections open until disconnected explicitly.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on a single request/response exchange.
    pub request_timeout: Duration,
}

impl ConnectionOptions {
    pub fn policy(&self) -> TransportPolicy {
        TransportPolicy {
            network_only: self.network_only,
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            network_only: false,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl From<&McpConfig> for ConnectionOptions {
    fn from(config: &McpConfig) -> Self {
        Self {
            network_only: config.network_only,
            idle_timeout: config.idle_timeout(),
            request_timeout: config.request_timeout(),
        }
    }
}
