//! Persistence port for MCP server records.
//!
//! The connection layer never talks to storage; whoever owns the set of
//! connections reads records through this trait and builds connections from
//! them. [`InMemoryServerStore`] is the reference implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;

/// A persisted MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerRecord {
    pub id: i64,
    pub name: String,
    pub config: ServerConfig,
    pub enabled: bool,
}

/// A server that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMcpServer {
    pub name: String,
    pub config: ServerConfig,
    pub enabled: bool,
}

impl NewMcpServer {
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            enabled: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("MCP server not found: {0}")]
    NotFound(String),

    #[error("MCP server already exists: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Internal(String),
}

/// Storage for MCP server records.
///
/// Server names are unique. `update` replaces the whole record.
#[async_trait]
pub trait McpServerStore: Send + Sync {
    /// Insert a new server and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// - `Conflict` if a server with the same name already exists
    async fn insert(&self, server: NewMcpServer) -> Result<McpServerRecord, StoreError>;

    async fn get_by_id(&self, id: i64) -> Result<McpServerRecord, StoreError>;

    async fn get_by_name(&self, name: &str) -> Result<McpServerRecord, StoreError>;

    async fn list(&self) -> Result<Vec<McpServerRecord>, StoreError>;

    /// # Errors
    ///
    /// - `NotFound` if no server with the record's id exists
    /// - `Conflict` if the new name belongs to another server
    async fn update(&self, server: &McpServerRecord) -> Result<(), StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    async fn exists_by_name(&self, name: &str) -> Result<bool, StoreError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct StoreInner {
    next_id: i64,
    records: Vec<McpServerRecord>,
}

/// Process-local store, kept in insertion order.
#[derive(Default)]
pub struct InMemoryServerStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryServerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl McpServerStore for InMemoryServerStore {
    async fn insert(&self, server: NewMcpServer) -> Result<McpServerRecord, StoreError> {
        let mut inner = self.inner.lock();
        if inner.records.iter().any(|r| r.name == server.name) {
            return Err(StoreError::Conflict(server.name));
        }
        inner.next_id += 1;
        let record = McpServerRecord {
            id: inner.next_id,
            name: server.name,
            config: server.config,
            enabled: server.enabled,
        };
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: i64) -> Result<McpServerRecord, StoreError> {
        self.inner
            .lock()
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_by_name(&self, name: &str) -> Result<McpServerRecord, StoreError> {
        self.inner
            .lock()
            .records
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<McpServerRecord>, StoreError> {
        Ok(self.inner.lock().records.clone())
    }

    async fn update(&self, server: &McpServerRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner
            .records
            .iter()
            .any(|r| r.name == server.name && r.id != server.id)
        {
            return Err(StoreError::Conflict(server.name.clone()));
        }
        let slot = inner
            .records
            .iter_mut()
            .find(|r| r.id == server.id)
            .ok_or_else(|| StoreError::NotFound(server.id.to_string()))?;
        *slot = server.clone();
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        inner.records.retain(|r| r.id != id);
        if inner.records.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().records.iter().any(|r| r.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_server() -> NewMcpServer {
        NewMcpServer::new("fs", ServerConfig::stdio("npx", vec!["server-fs".into()]))
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_rejects_duplicate_names() {
        let store = InMemoryServerStore::new();
        let a = store.insert(fs_server()).await.unwrap();
        let b = store
            .insert(NewMcpServer::new("web", ServerConfig::stream("http://localhost/mcp")))
            .await
            .unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert!(a.enabled);

        let err = store.insert(fs_server()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(name) if name == "fs"));
    }

    #[tokio::test]
    async fn lookups_by_id_and_name() {
        let store = InMemoryServerStore::new();
        let rec = store.insert(fs_server()).await.unwrap();

        assert_eq!(store.get_by_id(rec.id).await.unwrap(), rec);
        assert_eq!(store.get_by_name("fs").await.unwrap(), rec);
        assert!(store.exists_by_name("fs").await.unwrap());
        assert!(!store.exists_by_name("nope").await.unwrap());
        assert!(matches!(
            store.get_by_id(99).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_replaces_whole_record() {
        let store = InMemoryServerStore::new();
        let mut rec = store.insert(fs_server()).await.unwrap();
        rec.enabled = false;
        rec.config = ServerConfig::stream("https://example.com/mcp");
        store.update(&rec).await.unwrap();

        let stored = store.get_by_id(rec.id).await.unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.config.kind(), "stream");
    }

    #[tokio::test]
    async fn update_rejects_name_taken_by_another_record() {
        let store = InMemoryServerStore::new();
        store.insert(fs_server()).await.unwrap();
        let mut other = store
            .insert(NewMcpServer::new("web", ServerConfig::stream("http://localhost/mcp")))
            .await
            .unwrap();
        other.name = "fs".into();
        assert!(matches!(
            store.update(&other).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_and_reports_missing() {
        let store = InMemoryServerStore::new();
        let rec = store.insert(fs_server()).await.unwrap();
        store.delete(rec.id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(matches!(
            store.delete(rec.id).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
