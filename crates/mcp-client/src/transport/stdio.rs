use std::collections::BTreeMap;
use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use tl_domain::config::StdioServerConfig;

use super::{McpTransport, TransportError};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Maximum number of non-JSON lines to skip before declaring the server broken.
const MAX_SKIP_LINES: usize = 1000;

/// How long a child gets to exit after stdin is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Overlay config-supplied variables on the ambient environment.
///
/// Config entries win on conflict; `None` entries are dropped so the
/// ambient value (if any) survives. `PATH` passes through unless the
/// config sets it. Ambient entries are carried as raw OS strings, so a
/// non-Unicode variable is passed to the child untouched.
pub fn overlay_env<I>(
    ambient: I,
    overrides: &BTreeMap<String, Option<String>>,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = ambient.into_iter().collect();
    for (key, value) in overrides {
        if let Some(value) = value {
            env.insert(OsString::from(key), OsString::from(value));
        }
    }
    env
}

/// Stdio transport: communicates with a child process over stdin/stdout.
///
/// Each JSON-RPC message is a single newline-delimited line.
/// The `request_lock` serializes entire request/response cycles to prevent
/// response mismatching when multiple callers use the same server.
pub struct StdioTransport {
    server: String,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    request_lock: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
    request_timeout: Duration,
}

impl StdioTransport {
    /// Spawn a child process from the given server config.
    ///
    /// Must be called from within a tokio runtime (stderr is drained by a
    /// background task).
    pub fn spawn(
        server: &str,
        config: &StdioServerConfig,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let env = overlay_env(std::env::vars_os(), &config.env);

        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .env_clear()
            .envs(&env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        match std::env::current_dir() {
            Ok(cwd) => {
                cmd.current_dir(cwd);
            }
            Err(e) => {
                tracing::debug!(server, error = %e, "no current directory, child inherits default");
            }
        }

        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(server.to_string(), stderr));
        }

        tracing::debug!(server, command = %config.command, pid = ?child.id(), "spawned MCP server process");

        Ok(Self {
            server: server.to_string(),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            request_timeout,
        })
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        let mut stdin = self.stdin.lock().await;
        let written = async {
            stdin.write_all(json.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            self.alive.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    /// Read a line of JSON from stdout, skipping any empty or non-JSON lines.
    ///
    /// Gives up after [`MAX_SKIP_LINES`] non-JSON lines to prevent spinning
    /// on a misconfigured server that writes logging to stdout.
    async fn read_line(&self) -> Result<String, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let bytes_read = stdout.read_line(&mut line).await?;
            if bytes_read == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_string());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "MCP server produced too many non-JSON lines on stdout",
                )));
            }
            tracing::debug!(server = %self.server, line = %trimmed, "skipping non-JSON line from MCP server stdout");
        }
    }
}

async fn drain_stderr(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(server = %server, stderr = %line, "MCP server stderr"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "stopped reading MCP server stderr");
                break;
            }
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        // Serialize the entire request/response cycle so concurrent callers
        // cannot read each other's responses.
        let _guard = self.request_lock.lock().await;

        let id = self.next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;

        tracing::debug!(server = %self.server, id, method, "sending MCP request");
        self.write_line(&json).await?;

        // Servers may interleave notifications (no `id`) and stale replies
        // from abandoned requests; skip anything that is not our answer.
        let result = tokio::time::timeout(self.request_timeout, async {
            loop {
                let line = self.read_line().await?;
                if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&line) {
                    if resp.id == id {
                        return Ok(resp);
                    }
                    tracing::debug!(
                        expected_id = id,
                        got_id = resp.id,
                        "received response for different request, continuing"
                    );
                    continue;
                }
                tracing::debug!(line = %line, "skipping non-response message from MCP server");
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => {
                // A partial line may already be consumed; the stream is no
                // longer aligned on message boundaries.
                self.alive.store(false, Ordering::SeqCst);
                tracing::warn!(server = %self.server, id, method, "MCP request timed out, transport retired");
                Err(TransportError::Timeout)
            }
        }
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method, params);
        let json = serde_json::to_string(&notif)?;
        tracing::debug!(server = %self.server, method, "sending MCP notification");
        self.write_line(&json).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        // Closing stdin is the polite way to ask the server to exit.
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(server = %self.server, error = %e, "error closing MCP server stdin");
            }
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server, ?status, "MCP server process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::warn!(server = %self.server, "MCP server process did not exit within timeout, killing");
                child.kill().await.map_err(TransportError::Io)
            }
        }
    }
}
