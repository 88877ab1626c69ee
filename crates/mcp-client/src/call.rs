//! Fail-safe tool-call pipeline.
//!
//! A call runs through named stages, each a plain function over
//! `Result<_, CallFailure>`:
//!
//! ```text
//! require_session ─► send_call ─► check_rpc ─► decode_result ─► recover
//! ```
//!
//! Only [`recover`] leaves the `Result` world; it renders any failure into
//! the same [`ToolCallResult`] shape a server uses for its own errors, so
//! callers see exactly one result type whatever went wrong.

use serde_json::Value;

use crate::protocol::{self, JsonRpcError, JsonRpcResponse, ToolCallResult};
use crate::transport::{McpTransport, TransportError};

/// Why a call could not produce a server-supplied result.
#[derive(Debug, thiserror::Error)]
pub enum CallFailure {
    #[error("MCP server \"{server}\" is not connected: {reason}")]
    NotConnected { server: String, reason: String },

    #[error("tool call failed: {0}")]
    Transport(#[from] TransportError),

    #[error("server rejected the tool call: {0}")]
    Remote(JsonRpcError),

    #[error("server returned an empty tool result")]
    Empty,

    #[error("server returned a malformed tool result: {0}")]
    Malformed(String),
}

/// Stage 1: turn an absent session into a failure that names the cause.
pub fn require_session<S>(
    session: Option<S>,
    server: &str,
    last_error: Option<String>,
) -> Result<S, CallFailure> {
    session.ok_or_else(|| CallFailure::NotConnected {
        server: server.to_string(),
        reason: last_error.unwrap_or_else(|| "connection unavailable".into()),
    })
}

/// Stage 2: issue `tools/call`.
pub async fn send_call(
    client: &dyn McpTransport,
    tool: &str,
    input: Value,
) -> Result<JsonRpcResponse, CallFailure> {
    client
        .send_request("tools/call", Some(protocol::call_params(tool, input)))
        .await
        .map_err(CallFailure::from)
}

/// Stage 3: split JSON-RPC errors from results. A null result is empty.
pub fn check_rpc(resp: JsonRpcResponse) -> Result<Value, CallFailure> {
    match resp.into_result() {
        Ok(Value::Null) => Err(CallFailure::Empty),
        Ok(value) => Ok(value),
        Err(err) => Err(CallFailure::Remote(err)),
    }
}

/// Stage 4: decode the result payload.
///
/// A result with `isError: true` is already normalized and passes through.
pub fn decode_result(value: Value) -> Result<ToolCallResult, CallFailure> {
    let Value::Object(map) = &value else {
        return Err(CallFailure::Malformed(format!(
            "expected an object, got {}",
            json_kind(&value)
        )));
    };
    if !map.contains_key("content") && !map.contains_key("structuredContent") {
        return Err(CallFailure::Empty);
    }
    serde_json::from_value(value).map_err(|e| CallFailure::Malformed(e.to_string()))
}

/// Stage 5: fold any failure into an error result.
pub fn recover(outcome: Result<ToolCallResult, CallFailure>) -> ToolCallResult {
    outcome.unwrap_or_else(|failure| ToolCallResult::error(failure.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::ToolContent;

    #[test]
    fn require_session_reports_last_error() {
        let err = require_session::<()>(None, "fs", Some("spawn failed".into())).unwrap_err();
        assert_eq!(err.to_string(), "MCP server \"fs\" is not connected: spawn failed");
        assert_eq!(require_session(Some(7), "fs", None).unwrap(), 7);
    }

    #[test]
    fn check_rpc_maps_remote_error() {
        let resp = JsonRpcResponse::failure(
            1,
            JsonRpcError {
                code: -32602,
                message: "unknown tool".into(),
                data: None,
            },
        );
        match check_rpc(resp) {
            Err(CallFailure::Remote(e)) => assert_eq!(e.code, -32602),
            other => panic!("expected remote failure, got {other:?}"),
        }
    }

    #[test]
    fn check_rpc_null_result_is_empty() {
        let resp = JsonRpcResponse::success(1, Value::Null);
        assert!(matches!(check_rpc(resp), Err(CallFailure::Empty)));
    }

    #[test]
    fn decode_rejects_non_objects() {
        let err = decode_result(json!([1, 2])).unwrap_err();
        assert!(matches!(err, CallFailure::Malformed(ref m) if m.contains("an array")));
        assert!(matches!(decode_result(json!("hi")), Err(CallFailure::Malformed(_))));
    }

    #[test]
    fn decode_object_without_content_is_empty() {
        assert!(matches!(decode_result(json!({})), Err(CallFailure::Empty)));
    }

    #[test]
    fn decode_bad_content_is_malformed() {
        let err = decode_result(json!({ "content": "not a list" })).unwrap_err();
        assert!(matches!(err, CallFailure::Malformed(_)));
    }

    #[test]
    fn remote_tool_error_passes_through() {
        let value = json!({
            "content": [{ "type": "text", "text": "disk full" }],
            "isError": true
        });
        let result = recover(decode_result(value));
        assert!(result.is_error);
        assert_eq!(result.text(), "disk full");
    }

    #[test]
    fn structured_only_result_is_accepted() {
        let result = decode_result(json!({ "structuredContent": { "n": 3 } })).unwrap();
        assert!(!result.is_error);
        assert!(result.content.is_empty());
        assert_eq!(result.structured_content, Some(json!({ "n": 3 })));
    }

    #[test]
    fn recover_renders_failures() {
        let result = recover(Err(CallFailure::Transport(TransportError::Timeout)));
        assert!(result.is_error);
        assert_eq!(
            result.content,
            vec![ToolContent::text("tool call failed: timeout waiting for response")]
        );
    }

    #[test]
    fn pipeline_chains_to_success() {
        let resp = JsonRpcResponse::success(
            4,
            json!({ "content": [{ "type": "text", "text": "hi" }] }),
        );
        let result = recover(check_rpc(resp).and_then(decode_result));
        assert!(!result.is_error);
        assert_eq!(result.text(), "hi");
    }
}
