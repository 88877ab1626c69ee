//! Registry: the caller-side mapping from server name to connection.
//!
//! The map is immutable once published. [`McpRegistry::apply`] builds a
//! fresh map and swaps it in whole, so readers never see a half-applied
//! configuration.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use tl_domain::config::McpConfig;
use tl_domain::tool::ToolDefinition;

use crate::config::ConnectionOptions;
use crate::connection::{McpConnection, ServerInfo};
use crate::error::McpError;
use crate::protocol::ToolCallResult;
use crate::transport::{DefaultTransportFactory, TransportFactory};
use crate::wrapper::{parse_qualified_name, ToolWrapper};

type ConnectionMap = HashMap<String, Arc<McpConnection>>;

/// Holds one [`McpConnection`] per enabled server.
pub struct McpRegistry {
    factory: Arc<dyn TransportFactory>,
    connections: RwLock<Arc<ConnectionMap>>,
}

impl McpRegistry {
    /// Create an empty registry (no MCP servers configured).
    pub fn new() -> Self {
        Self::with_factory(Arc::new(DefaultTransportFactory))
    }

    pub fn with_factory(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            connections: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Build a registry from config. Nothing connects until first use.
    ///
    /// Servers with a malformed config are logged and skipped (not fatal).
    pub async fn from_config(config: &McpConfig) -> Self {
        let registry = Self::new();
        registry.apply(config).await;
        registry
    }

    /// Replace the connection set to match `config`.
    ///
    /// Entries whose config and options are unchanged keep their live
    /// connection. Connections for removed, disabled or changed entries are
    /// disconnected. Returns the entries that could not be constructed.
    pub async fn apply(&self, config: &McpConfig) -> Vec<(String, McpError)> {
        let options = ConnectionOptions::from(config);
        let current = self.snapshot();
        let mut next = ConnectionMap::new();
        let mut rejected = Vec::new();

        for entry in config.enabled_servers() {
            if next.contains_key(&entry.name) {
                tracing::warn!(server = %entry.name, "duplicate MCP server name, keeping the first entry");
                continue;
            }

            if let Some(existing) = current.get(&entry.name) {
                if existing.config() == &entry.config && existing.options() == &options {
                    next.insert(entry.name.clone(), Arc::clone(existing));
                    continue;
                }
            }

            match McpConnection::with_factory(
                entry.name.clone(),
                entry.config.clone(),
                options,
                Arc::clone(&self.factory),
            ) {
                Ok(connection) => {
                    tracing::info!(server = %entry.name, transport = entry.config.kind(), "registered MCP server");
                    next.insert(entry.name.clone(), connection);
                }
                Err(e) => {
                    tracing::warn!(server = %entry.name, error = %e, "invalid MCP server config, skipping");
                    rejected.push((entry.name.clone(), e));
                }
            }
        }

        let next = Arc::new(next);
        let previous = std::mem::replace(&mut *self.connections.write(), Arc::clone(&next));

        let stale: Vec<_> = previous
            .iter()
            .filter(|(name, conn)| {
                next.get(*name)
                    .map_or(true, |kept| !Arc::ptr_eq(kept, conn))
            })
            .map(|(_, conn)| Arc::clone(conn))
            .collect();
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "closing replaced MCP servers");
            futures_util::future::join_all(stale.iter().map(|c| c.disconnect())).await;
        }

        rejected
    }

    fn snapshot(&self) -> Arc<ConnectionMap> {
        Arc::clone(&self.connections.read())
    }

    pub fn get(&self, server: &str) -> Option<Arc<McpConnection>> {
        self.snapshot().get(server).cloned()
    }

    /// Registered server names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Snapshots of every server, sorted by name.
    pub fn infos(&self) -> Vec<ServerInfo> {
        let mut infos: Vec<_> = self.snapshot().values().map(|c| c.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Connect every server concurrently. Returns how many are connected.
    pub async fn connect_all(&self) -> usize {
        let connections = self.snapshot();
        let sessions =
            futures_util::future::join_all(connections.values().map(|c| c.connect())).await;
        sessions.iter().filter(|s| s.is_some()).count()
    }

    /// Wrappers of every currently connected server.
    ///
    /// Returns tuples of `(server_name, wrapper)`.
    pub fn list_tools(&self) -> Vec<(String, ToolWrapper)> {
        let connections = self.snapshot();
        let mut tools: Vec<_> = connections
            .iter()
            .flat_map(|(name, conn)| conn.tools().into_iter().map(move |t| (name.clone(), t)))
            .collect();
        tools.sort_by(|a, b| (&a.0, a.1.name()).cmp(&(&b.0, b.1.name())));
        tools
    }

    /// Tool definitions of every connected server, under `mcp:{server}:{tool}`.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list_tools().iter().map(|(_, t)| t.definition()).collect()
    }

    /// Call a tool on a specific server. Never fails: an unknown server is
    /// reported as an error result.
    pub async fn call_tool(&self, server: &str, tool: &str, input: Value) -> ToolCallResult {
        match self.get(server) {
            Some(connection) => connection.call_tool(tool, input).await,
            None => ToolCallResult::error(format!("MCP server not found: {server}")),
        }
    }

    /// Call a tool by its `mcp:{server}:{tool}` name.
    pub async fn call_qualified(&self, name: &str, input: Value) -> ToolCallResult {
        match parse_qualified_name(name) {
            Some((server, tool)) => self.call_tool(server, tool, input).await,
            None => ToolCallResult::error(format!(
                "invalid MCP tool name \"{name}\": expected mcp:{{server}}:{{tool}}"
            )),
        }
    }

    /// Disconnect all servers concurrently and empty the registry.
    pub async fn shutdown(&self) {
        let previous = std::mem::take(&mut *self.connections.write());
        if previous.is_empty() {
            return;
        }
        tracing::info!(count = previous.len(), "shutting down MCP servers");
        futures_util::future::join_all(previous.values().map(|c| c.disconnect())).await;
    }
}

impl Default for McpRegistry {
    fn default() -> Self {
        Self::new()
    }
}
