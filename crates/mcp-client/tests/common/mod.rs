//! Scripted in-memory MCP server for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tl_mcp_client::config::ServerConfig;
use tl_mcp_client::protocol::{JsonRpcError, JsonRpcResponse, PROTOCOL_VERSION};
use tl_mcp_client::{McpError, McpTransport, TransportError, TransportFactory, TransportPolicy};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Knobs and counters shared by a factory and every transport it builds.
#[derive(Default)]
pub struct Script {
    pub builds: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub calls: AtomicUsize,
    pub fail_build: AtomicBool,
    pub fail_init: AtomicBool,
    pub fail_close: AtomicBool,
    pub handshake_delay: Mutex<Duration>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_handshake_delay(delay: Duration) -> Arc<Self> {
        let script = Self::new();
        *script.handshake_delay.lock() = delay;
        script
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set(&self, flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }
}

/// Tool names the scripted server reports, across two `tools/list` pages.
pub const TOOL_NAMES: [&str; 7] = ["echo", "fail", "rpc_error", "null", "garbage", "slow", "disconnect"];

pub struct ScriptedFactory {
    pub script: Arc<Script>,
}

impl ScriptedFactory {
    pub fn new(script: &Arc<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::clone(script),
        })
    }
}

impl TransportFactory for ScriptedFactory {
    fn build(
        &self,
        _server: &str,
        _config: &ServerConfig,
        _policy: TransportPolicy,
        _request_timeout: Duration,
    ) -> Result<Arc<dyn McpTransport>, McpError> {
        self.script.builds.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_build.load(Ordering::SeqCst) {
            return Err(McpError::Transport(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "scripted spawn failure",
            ))));
        }
        Ok(Arc::new(ScriptedTransport {
            script: Arc::clone(&self.script),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        }))
    }
}

pub struct ScriptedTransport {
    script: Arc<Script>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl ScriptedTransport {
    async fn tools_call(&self, id: u64, params: Value) -> Result<JsonRpcResponse, TransportError> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let text = |t: &str| json!({ "content": [{ "type": "text", "text": t }] });

        let resp = match name {
            "echo" => {
                let said = args.get("text").and_then(Value::as_str).unwrap_or_default();
                JsonRpcResponse::success(id, text(said))
            }
            "fail" => JsonRpcResponse::success(
                id,
                json!({ "content": [{ "type": "text", "text": "remote failure" }], "isError": true }),
            ),
            "rpc_error" => JsonRpcResponse::failure(id, rpc_error(-32603, "internal boom")),
            "null" => JsonRpcResponse::success(id, Value::Null),
            "garbage" => JsonRpcResponse::success(id, json!("garbage")),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(10)).await;
                JsonRpcResponse::success(id, text("slow done"))
            }
            "disconnect" => {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }
            other => JsonRpcResponse::failure(id, rpc_error(-32602, &format!("unknown tool: {other}"))),
        };
        Ok(resp)
    }
}

fn rpc_error(code: i64, message: &str) -> JsonRpcError {
    JsonRpcError {
        code,
        message: message.into(),
        data: None,
    }
}

fn tool(name: &str) -> Value {
    if name == "echo" {
        json!({
            "name": "echo",
            "description": "Echo the given text",
            "inputSchema": {
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }
        })
    } else {
        json!({ "name": name, "description": format!("scripted {name}") })
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let params = params.unwrap_or(Value::Null);

        match method {
            "initialize" => {
                let delay = *self.script.handshake_delay.lock();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if self.script.fail_init.load(Ordering::SeqCst) {
                    return Err(TransportError::Http {
                        status: 500,
                        body: "init refused".into(),
                    });
                }
                Ok(JsonRpcResponse::success(
                    id,
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "serverInfo": { "name": "scripted", "version": "1.0.0" },
                        "instructions": "use echo"
                    }),
                ))
            }
            "tools/list" => {
                let page = match params.get("cursor").and_then(Value::as_str) {
                    None => json!({
                        "tools": TOOL_NAMES[..2].iter().map(|n| tool(n)).collect::<Vec<_>>(),
                        "nextCursor": "page-2"
                    }),
                    Some(_) => json!({
                        "tools": TOOL_NAMES[2..].iter().map(|n| tool(n)).collect::<Vec<_>>()
                    }),
                };
                Ok(JsonRpcResponse::success(id, page))
            }
            "tools/call" => self.tools_call(id, params).await,
            other => Ok(JsonRpcResponse::failure(
                id,
                rpc_error(-32601, &format!("method not found: {other}")),
            )),
        }
    }

    async fn send_notification(
        &self,
        _method: &str,
        _params: Option<Value>,
    ) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.alive.store(false, Ordering::SeqCst);
        self.script.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "scripted close failure",
            )));
        }
        Ok(())
    }
}

/// A valid config; the scripted factory ignores its contents.
pub fn stream_config() -> ServerConfig {
    ServerConfig::stream("http://127.0.0.1:9/mcp")
}
