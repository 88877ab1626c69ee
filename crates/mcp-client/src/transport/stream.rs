use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::Value;

use tl_domain::config::{ConfigError, StreamServerConfig};

use super::{McpTransport, TransportError};
use crate::error::McpError;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::sse;

const SESSION_HEADER: &str = "mcp-session-id";

/// Longest error body kept in a [`TransportError::Http`].
const MAX_ERROR_BODY: usize = 512;

/// Streamable HTTP transport.
///
/// Every message is a `POST` to the configured endpoint. The server answers
/// with a JSON body or an event stream carrying the reply; a session id
/// handed out during `initialize` is replayed on every later request.
pub struct StreamTransport {
    server: String,
    http: Client,
    url: Url,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StreamTransport {
    /// Build the HTTP client. No request is sent until the first message.
    pub fn new(
        server: &str,
        config: &StreamServerConfig,
        request_timeout: Duration,
    ) -> Result<Self, McpError> {
        let url = Url::parse(&config.url)
            .map_err(|e| ConfigError::error("url", format!("invalid URL: {e}")))?;

        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ConfigError::error("headers", format!("invalid header name {key:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::error("headers", format!("invalid value for header {key:?}: {e}")))?;
            headers.insert(name, value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            server: server.to_string(),
            http,
            url,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    async fn post<T: serde::Serialize>(&self, message: &T) -> Result<Response, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let mut rb = self
            .http
            .post(self.url.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session) = self.session_id() {
            rb = rb.header(SESSION_HEADER, session);
        }

        let resp = rb.send().await?;

        if let Some(session) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut slot = self.session_id.lock();
            if slot.as_deref() != Some(session) {
                tracing::debug!(server = %self.server, "MCP session established");
                *slot = Some(session.to_string());
            }
        }

        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }
        Ok(resp)
    }

    /// Read an event stream until the response with `id` arrives.
    async fn read_event_stream(
        &self,
        mut resp: Response,
        id: u64,
    ) -> Result<JsonRpcResponse, TransportError> {
        let mut buffer = String::new();
        // Bytes of a character split across chunk boundaries.
        let mut pending = Vec::new();
        loop {
            let chunk = resp.chunk().await?;
            let ended = chunk.is_none();
            match chunk {
                Some(bytes) => buffer.push_str(&sse::decode_utf8(&mut pending, &bytes)),
                None => {
                    if !pending.is_empty() {
                        buffer.push_str(&String::from_utf8_lossy(&pending));
                        pending.clear();
                    }
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                    }
                }
            }

            for data in sse::drain_data_lines(&mut buffer) {
                match serde_json::from_str::<JsonRpcResponse>(&data) {
                    Ok(reply) if reply.id == id => return Ok(reply),
                    Ok(reply) => {
                        tracing::debug!(expected_id = id, got_id = reply.id, "skipping response for different request");
                    }
                    Err(_) => {
                        tracing::debug!(server = %self.server, data = %data, "skipping non-response event");
                    }
                }
            }

            if ended {
                return Err(TransportError::StreamEnded);
            }
        }
    }
}

async fn http_error(resp: Response) -> TransportError {
    let status = resp.status().as_u16();
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    TransportError::Http { status, body }
}

#[async_trait]
impl McpTransport for StreamTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        tracing::debug!(server = %self.server, id, method, "sending MCP request");
        let resp = self.post(&req).await?;

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if sse::is_event_stream(&content_type) {
            return self.read_event_stream(resp, id).await;
        }

        let body = resp.text().await?;
        let reply: JsonRpcResponse = serde_json::from_str(&body)?;
        if reply.id != id {
            return Err(TransportError::IdMismatch {
                expected: id,
                got: reply.id,
            });
        }
        Ok(reply)
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method, params);
        tracing::debug!(server = %self.server, method, "sending MCP notification");
        self.post(&notif).await.map(|_| ())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.alive.store(false, Ordering::SeqCst);
        let Some(session) = self.session_id.lock().take() else {
            return Ok(());
        };

        let resp = self
            .http
            .delete(self.url.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await?;

        // Servers that do not let clients end sessions answer 405.
        if resp.status().is_success() || resp.status() == StatusCode::METHOD_NOT_ALLOWED {
            tracing::debug!(server = %self.server, "MCP session closed");
            return Ok(());
        }
        Err(http_error(resp).await)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn config(headers: &[(&str, &str)]) -> StreamServerConfig {
        StreamServerConfig {
            url: "http://127.0.0.1:9/mcp".into(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn invalid_header_name_is_a_config_error() {
        let err = StreamTransport::new("remote", &config(&[("bad header", "x")]), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Config(e) if e.field == "headers"));
    }

    #[test]
    fn invalid_header_value_is_a_config_error() {
        let err = StreamTransport::new("remote", &config(&[("x-token", "line\nbreak")]), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Config(_)));
    }

    #[tokio::test]
    async fn closed_transport_refuses_requests() {
        let transport = StreamTransport::new("remote", &config(&[]), Duration::from_secs(1)).unwrap();
        transport.shutdown().await.unwrap();
        assert!(!transport.is_alive());
        let err = transport.send_request("ping", None).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
