//! Connection manager: one server's connection lifecycle.
//!
//! ```text
//!              connect()                 handshake ok
//! Disconnected ─────────► Connecting ──────────────────► Connected
//!      ▲                      │                              │
//!      │   handshake failed   │      disconnect() / idle     │
//!      └──────────────────────┴──────────────────────────────┘
//! ```
//!
//! Connects are lazy and mutually exclusive: concurrent callers share one
//! handshake through the [`Locker`]. Nothing in this module returns an
//! error to the caller after construction; failures are recorded in
//! [`McpConnection::last_error`] and surface in [`ServerInfo`] and in
//! tool-call results.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use tl_domain::config::ServerConfig;

use crate::call;
use crate::config::ConnectionOptions;
use crate::debounce::Debouncer;
use crate::error::McpError;
use crate::locker::{LockGuard, Locker};
use crate::protocol::{
    self, Implementation, InitializeResult, JsonRpcResponse, ToolCallResult, ToolDescriptor,
    ToolsListResult,
};
use crate::transport::{DefaultTransportFactory, McpTransport, TransportFactory};
use crate::wrapper::{build_wrappers, ToolWrapper};

/// Upper bound on `tools/list` pages fetched per connect.
const MAX_TOOL_PAGES: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Externally visible status. Derived on every read, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Connected,
    Disconnected,
    Loading,
}

/// Read-only snapshot of one connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub config: ServerConfig,
    pub status: ServerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_info: Vec<ToolDescriptor>,
}

/// A live, handshaken session with one server.
///
/// Handed out by [`McpConnection::connect`]; the transport inside stays
/// private to this crate.
pub struct Session {
    generation: u64,
    server_info: Option<Implementation>,
    protocol_version: String,
    instructions: Option<String>,
    descriptors: Vec<ToolDescriptor>,
    tools: BTreeMap<String, ToolWrapper>,
    pub(crate) client: Arc<dyn McpTransport>,
}

impl Session {
    /// Which handshake produced this session (1 for the first).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn tools(&self) -> &BTreeMap<String, ToolWrapper> {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Option<&ToolWrapper> {
        self.tools.get(name)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation)
            .field("server_info", &self.server_info)
            .field("protocol_version", &self.protocol_version)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

struct Inner {
    state: ConnectionState,
    session: Option<Arc<Session>>,
    last_error: Option<Arc<McpError>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpConnection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owns the connection to exactly one MCP server.
///
/// Always held in an `Arc`; tool wrappers and the idle timer keep `Weak`
/// references back to it.
pub struct McpConnection {
    name: String,
    config: ServerConfig,
    options: ConnectionOptions,
    factory: Arc<dyn TransportFactory>,
    locker: Locker,
    idle: Option<Debouncer>,
    inner: Mutex<Inner>,
    handshakes: AtomicU64,
    this: Weak<McpConnection>,
}

impl McpConnection {
    /// Create a disconnected manager. A malformed config is the only hard
    /// failure.
    pub fn new(
        name: impl Into<String>,
        config: ServerConfig,
        options: ConnectionOptions,
    ) -> Result<Arc<Self>, McpError> {
        Self::with_factory(name, config, options, Arc::new(DefaultTransportFactory))
    }

    /// Like [`new`](Self::new), with transports built by `factory`.
    pub fn with_factory(
        name: impl Into<String>,
        config: ServerConfig,
        options: ConnectionOptions,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Arc<Self>, McpError> {
        config.validate()?;
        let name = name.into();
        Ok(Arc::new_cyclic(|this| Self {
            name,
            config,
            options,
            factory,
            locker: Locker::new(),
            idle: options.idle_timeout.map(Debouncer::new),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                session: None,
                last_error: None,
            }),
            handshakes: AtomicU64::new(0),
            this: this.clone(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// `Loading` while a connect or disconnect holds the lock.
    pub fn status(&self) -> ServerStatus {
        if self.locker.is_locked() {
            return ServerStatus::Loading;
        }
        match self.inner.lock().state {
            ConnectionState::Connected => ServerStatus::Connected,
            ConnectionState::Connecting => ServerStatus::Loading,
            ConnectionState::Disconnected => ServerStatus::Disconnected,
        }
    }

    /// The most recent connect or close failure. Cleared by a successful
    /// connect.
    pub fn last_error(&self) -> Option<Arc<McpError>> {
        self.inner.lock().last_error.clone()
    }

    /// Number of handshakes started over this manager's lifetime.
    pub fn handshake_count(&self) -> u64 {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Whether an idle disconnect is armed.
    pub fn idle_pending(&self) -> bool {
        self.idle.as_ref().is_some_and(Debouncer::is_pending)
    }

    /// The current session, if connected and the transport is still up.
    pub fn session(&self) -> Option<Arc<Session>> {
        let inner = self.inner.lock();
        match (&inner.state, &inner.session) {
            (ConnectionState::Connected, Some(session)) if session.client.is_alive() => {
                Some(Arc::clone(session))
            }
            _ => None,
        }
    }

    /// Wrappers for the discovered tools; empty unless connected.
    pub fn tools(&self) -> Vec<ToolWrapper> {
        let inner = self.inner.lock();
        match (&inner.state, &inner.session) {
            (ConnectionState::Connected, Some(session)) => session.tools.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn info(&self) -> ServerInfo {
        let status = self.status();
        let inner = self.inner.lock();
        let tool_info = match (&inner.state, &inner.session) {
            (ConnectionState::Connected, Some(session)) => session.descriptors.clone(),
            _ => Vec::new(),
        };
        ServerInfo {
            name: self.name.clone(),
            config: self.config.clone(),
            status,
            error: inner.last_error.as_ref().map(|e| e.to_string()),
            tool_info,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Connect if needed and return the live session.
    ///
    /// Concurrent callers share a single handshake: whoever loses the race
    /// waits for the winner and reads its outcome. Failures are recorded,
    /// never returned; `None` means "not connected, see `last_error`".
    ///
    /// The handshake runs on its own task. Cancelling a caller only drops
    /// that caller's wait; the handshake still completes for everyone else.
    pub async fn connect(&self) -> Option<Arc<Session>> {
        if self.locker.is_locked() {
            self.locker.wait().await;
            return self.session();
        }
        if let Some(session) = self.session() {
            return Some(session);
        }
        let this = self.this.upgrade()?;
        let handshake = tokio::spawn(async move {
            match this.locker.try_lock() {
                Some(guard) => this.establish(guard).await,
                None => {
                    this.locker.wait().await;
                    this.session()
                }
            }
        });
        match handshake.await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(server = %self.name, error = %e, "MCP connect task did not complete");
                None
            }
        }
    }

    /// Tear the connection down after any in-flight connect completes.
    ///
    /// Close failures are logged and recorded, never returned.
    pub async fn disconnect(&self) {
        let guard = loop {
            self.locker.wait().await;
            if let Some(guard) = self.locker.try_lock() {
                break guard;
            }
        };

        let session = {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Disconnected;
            inner.session.take()
        };
        if let Some(idle) = &self.idle {
            idle.cancel();
        }
        drop(guard);

        let Some(session) = session else {
            return;
        };
        tracing::info!(server = %self.name, "disconnecting MCP server");
        if let Err(e) = session.client.shutdown().await {
            tracing::warn!(server = %self.name, error = %e, "failed to close MCP transport");
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disconnected {
                inner.last_error = Some(Arc::new(McpError::Close(e)));
            }
        }
    }

    /// Call a remote tool, connecting first if needed.
    ///
    /// Every failure comes back as a result with `is_error` set. The idle
    /// timer is re-armed whatever the outcome.
    pub async fn call_tool(&self, tool: &str, input: Value) -> ToolCallResult {
        let outcome = self.try_call(tool, input).await;
        self.arm_idle();
        if let Err(failure) = &outcome {
            tracing::warn!(server = %self.name, tool, error = %failure, "MCP tool call failed");
        }
        call::recover(outcome)
    }

    async fn try_call(&self, tool: &str, input: Value) -> Result<ToolCallResult, call::CallFailure> {
        let session = self.connect().await;
        let last_error = self.last_error().map(|e| e.to_string());
        let session = call::require_session(session, &self.name, last_error)?;
        call::send_call(session.client.as_ref(), tool, input)
            .await
            .and_then(call::check_rpc)
            .and_then(call::decode_result)
    }

    // ── Internals ─────────────────────────────────────────────────────

    async fn establish(&self, _guard: LockGuard<'_>) -> Option<Arc<Session>> {
        let generation = self.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
        let stale = {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Connecting;
            inner.session.take()
        };
        let reset = ResetOnCancel::new(self);

        if let Some(stale) = stale {
            tracing::debug!(server = %self.name, "replacing dead MCP transport");
            if let Err(e) = stale.client.shutdown().await {
                tracing::debug!(server = %self.name, error = %e, "error closing dead MCP transport");
            }
        }

        tracing::info!(server = %self.name, transport = self.config.kind(), generation, "connecting to MCP server");
        let outcome = self.open_session(generation).await;
        reset.disarm();

        let mut inner = self.inner.lock();
        match outcome {
            Ok(session) => {
                tracing::info!(
                    server = %self.name,
                    tool_count = session.tools.len(),
                    "MCP server connected"
                );
                let session = Arc::new(session);
                inner.state = ConnectionState::Connected;
                inner.last_error = None;
                inner.session = Some(Arc::clone(&session));
                drop(inner);
                self.arm_idle();
                Some(session)
            }
            Err(e) => {
                tracing::warn!(server = %self.name, error = %e, "failed to connect to MCP server");
                inner.state = ConnectionState::Disconnected;
                inner.last_error = Some(Arc::new(e));
                None
            }
        }
    }

    /// Build the transport, handshake, and list tools. A transport that was
    /// built is shut down again if anything after it fails.
    async fn open_session(&self, generation: u64) -> Result<Session, McpError> {
        let client = self.factory.build(
            &self.name,
            &self.config,
            self.options.policy(),
            self.options.request_timeout,
        )?;

        match self.handshake(&client, generation).await {
            Ok(session) => Ok(session),
            Err(e) => {
                if let Err(close) = client.shutdown().await {
                    tracing::debug!(server = %self.name, error = %close, "error closing MCP transport after failed handshake");
                }
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        client: &Arc<dyn McpTransport>,
        generation: u64,
    ) -> Result<Session, McpError> {
        let params = serde_json::to_value(protocol::initialize_params())
            .map_err(|e| McpError::Protocol(format!("failed to serialize initialize params: {e}")))?;
        let init: InitializeResult =
            decode(client.send_request("initialize", Some(params)).await?, "initialize")?;
        tracing::debug!(server = %self.name, protocol_version = %init.protocol_version, "MCP initialize response received");

        client
            .send_notification("notifications/initialized", None)
            .await?;

        let descriptors = self.list_tools(client.as_ref()).await?;
        let tools = build_wrappers(&self.name, &descriptors, &self.this);

        Ok(Session {
            generation,
            server_info: init.server_info,
            protocol_version: init.protocol_version,
            instructions: init.instructions,
            descriptors,
            tools,
            client: Arc::clone(client),
        })
    }

    async fn list_tools(&self, client: &dyn McpTransport) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut descriptors = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
            let page: ToolsListResult =
                decode(client.send_request("tools/list", params).await?, "tools/list")?;
            descriptors.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(descriptors),
            }
        }
        tracing::warn!(server = %self.name, pages = MAX_TOOL_PAGES, "MCP tool listing truncated");
        Ok(descriptors)
    }

    fn arm_idle(&self) {
        let Some(idle) = &self.idle else {
            return;
        };
        let this = self.this.clone();
        idle.schedule(move || async move {
            if let Some(connection) = this.upgrade() {
                tracing::info!(server = %connection.name, "MCP server idle, disconnecting");
                connection.disconnect().await;
            }
        });
    }
}

impl Drop for McpConnection {
    fn drop(&mut self) {
        let Some(session) = self.inner.get_mut().session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let name = std::mem::take(&mut self.name);
                handle.spawn(async move {
                    if let Err(e) = session.client.shutdown().await {
                        tracing::warn!(server = %name, error = %e, "failed to close MCP transport on drop");
                    }
                });
            }
            Err(_) => {
                tracing::debug!(server = %self.name, "no runtime on drop, MCP transport dropped without shutdown");
            }
        }
    }
}

/// Puts a `Connecting` manager back to `Disconnected` when the handshake
/// task is torn down mid-flight (runtime shutdown).
struct ResetOnCancel<'a> {
    connection: &'a McpConnection,
    armed: bool,
}

impl<'a> ResetOnCancel<'a> {
    fn new(connection: &'a McpConnection) -> Self {
        Self {
            connection,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ResetOnCancel<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.connection.inner.lock();
        if inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Disconnected;
        }
    }
}

fn decode<T: DeserializeOwned>(resp: JsonRpcResponse, method: &str) -> Result<T, McpError> {
    let value = resp
        .into_result()
        .map_err(|e| McpError::Protocol(format!("{method} failed: {e}")))?;
    serde_json::from_value(value).map_err(|e| McpError::Protocol(format!("invalid {method} result: {e}")))
}
