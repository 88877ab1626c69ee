//! MCP (Model Context Protocol) configuration types for the domain layer.
//!
//! These are plain config structs used to deserialize the `[mcp]` section
//! of an embedding application's config. The connection logic lives in the
//! `tl-mcp-client` crate.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigSeverity};
use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server config (sum type)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How to reach a single MCP server.
///
/// The variant is selected by the `transport` tag. Reconfiguring a server
/// means building a new connection from a new value; configs are never
/// mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ServerConfig {
    /// Spawn a local subprocess and speak JSON-RPC over stdin/stdout.
    Stdio(StdioServerConfig),
    /// Talk to a remote endpoint over HTTP (streamable HTTP / SSE).
    #[serde(alias = "sse", alias = "http")]
    Stream(StreamServerConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StdioServerConfig {
    /// The command to spawn (e.g. `"npx"`).
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Entries overlaid on the ambient process environment.
    ///
    /// A `null` value is an undefined entry: it is dropped, not passed
    /// through as an empty string.
    #[serde(default)]
    pub env: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamServerConfig {
    /// Endpoint URL (e.g. `http://localhost:8080/mcp`).
    pub url: String,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ServerConfig {
    /// Convenience constructor for a stdio server.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Stdio(StdioServerConfig {
            command: command.into(),
            args,
            env: BTreeMap::new(),
        })
    }

    /// Convenience constructor for a stream server.
    pub fn stream(url: impl Into<String>) -> Self {
        Self::Stream(StreamServerConfig {
            url: url.into(),
            headers: BTreeMap::new(),
        })
    }

    /// Transport tag as text (for logs and snapshots).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::Stream(_) => "stream",
        }
    }

    /// Check the config is well-formed before any connection attempt.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        match self {
            Self::Stdio(cfg) => {
                if cfg.command.trim().is_empty() {
                    return Err(ConfigError::error("command", "command must not be empty"));
                }
                Ok(())
            }
            Self::Stream(cfg) => {
                let url = url::Url::parse(&cfg.url).map_err(|e| {
                    ConfigError::error("url", format!("invalid URL {:?}: {e}", cfg.url))
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ConfigError::error(
                        "url",
                        format!("unsupported URL scheme \"{}\"", url.scheme()),
                    ));
                }
                if let Some(name) = cfg.headers.keys().find(|k| k.trim().is_empty()) {
                    return Err(ConfigError::error(
                        "headers",
                        format!("header name {name:?} must not be blank"),
                    ));
                }
                Ok(())
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP section
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Restrict connections to network transports (no subprocesses).
    #[serde(default)]
    pub network_only: bool,

    /// Disconnect after this many seconds without activity (0 = never).
    #[serde(default = "d_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Upper bound for a single request/response exchange.
    #[serde(default = "d_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub servers: Vec<McpServerEntry>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            network_only: false,
            idle_timeout_secs: d_idle_timeout_secs(),
            request_timeout_secs: d_request_timeout_secs(),
            servers: Vec::new(),
        }
    }
}

/// One named server in the MCP section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerEntry {
    pub name: String,

    #[serde(default = "d_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub config: ServerConfig,
}

fn d_idle_timeout_secs() -> u64 {
    300
}

fn d_request_timeout_secs() -> u64 {
    30
}

fn d_true() -> bool {
    true
}

impl McpConfig {
    /// Parse the MCP section from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Parse the MCP section from JSON text.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load from a file; `.json` is parsed as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_toml_str(&raw),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Enabled server entries, in declaration order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &McpServerEntry> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Validate the section and return every issue found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.request_timeout_secs == 0 {
            errors.push(ConfigError::error(
                "mcp.request_timeout_secs",
                "request timeout must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            if server.name.trim().is_empty() {
                errors.push(ConfigError::error(
                    format!("mcp.servers[{i}].name"),
                    "server name must not be empty",
                ));
            } else if !seen.insert(server.name.as_str()) {
                errors.push(ConfigError::error(
                    format!("mcp.servers[{i}].name"),
                    format!("duplicate server name \"{}\"", server.name),
                ));
            }

            if let Err(e) = server.config.validate() {
                errors.push(ConfigError {
                    field: format!("mcp.servers[{i}].{}", e.field),
                    ..e
                });
            }

            if self.network_only && server.enabled && matches!(server.config, ServerConfig::Stdio(_)) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("mcp.servers[{i}].transport"),
                    message: "stdio transport is disabled by network_only and will fail to connect"
                        .into(),
                });
            }
        }

        errors
    }
}
