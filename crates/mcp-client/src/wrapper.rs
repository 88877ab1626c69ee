//! Tool wrappers: remote tool descriptors turned into local operations.
//!
//! A wrapper owns a normalized copy of the tool's parameter contract and a
//! weak back-reference to its connection. It never keeps the connection
//! alive and never touches the transport; every call goes through
//! [`McpConnection::call_tool`].

use std::collections::BTreeMap;
use std::sync::Weak;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use tl_domain::tool::ToolDefinition;

use crate::connection::McpConnection;
use crate::protocol::{ToolCallResult, ToolDescriptor};

const QUALIFIED_PREFIX: &str = "mcp:";

/// Why a wrapper refused to issue a call.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WrapperError {
    #[error("tool \"{0}\" was cancelled")]
    Cancelled(String),

    #[error("invalid input for tool \"{tool}\": {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error("MCP server \"{0}\" is no longer available")]
    ConnectionDropped(String),
}

/// A locally callable operation bound to one remote tool.
#[derive(Debug, Clone)]
pub struct ToolWrapper {
    server: String,
    descriptor: ToolDescriptor,
    parameters: Value,
    connection: Weak<McpConnection>,
}

impl ToolWrapper {
    pub fn new(server: &str, descriptor: ToolDescriptor, connection: Weak<McpConnection>) -> Self {
        let parameters = normalize_schema(&descriptor.input_schema);
        Self {
            server: server.to_string(),
            descriptor,
            parameters,
            connection,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn description(&self) -> &str {
        &self.descriptor.description
    }

    /// The normalized parameter contract.
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// The descriptor as reported by the server.
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// `mcp:{server}:{tool}`, unique across servers.
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.server, &self.descriptor.name)
    }

    /// The provider-agnostic definition handed to an orchestrator.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.qualified_name(),
            description: self.descriptor.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Check `input` against the normalized contract.
    pub fn validate_input(&self, input: &Value) -> Result<(), WrapperError> {
        let invalid = |reason: String| WrapperError::InvalidInput {
            tool: self.descriptor.name.clone(),
            reason,
        };

        let Value::Object(args) = input else {
            return Err(invalid("arguments must be a JSON object".into()));
        };

        if let Some(Value::Object(declared)) = self.parameters.get("properties") {
            if let Some(extra) = args.keys().find(|k| !declared.contains_key(*k)) {
                return Err(invalid(format!("unexpected argument \"{extra}\"")));
            }
        }

        if let Some(Value::Array(required)) = self.parameters.get("required") {
            let missing = required
                .iter()
                .filter_map(Value::as_str)
                .find(|k| !args.contains_key(*k));
            if let Some(missing) = missing {
                return Err(invalid(format!("missing required argument \"{missing}\"")));
            }
        }

        Ok(())
    }

    /// Invoke the remote tool.
    ///
    /// An already-cancelled token fails before anything is sent. Once the
    /// call is in flight, cancellation abandons it; the connection stays
    /// usable and the late reply is discarded by the transport.
    pub async fn execute(
        &self,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<ToolCallResult, WrapperError> {
        if cancel.is_cancelled() {
            return Err(WrapperError::Cancelled(self.descriptor.name.clone()));
        }

        let input = match input {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        self.validate_input(&input)?;

        let connection = self
            .connection
            .upgrade()
            .ok_or_else(|| WrapperError::ConnectionDropped(self.server.clone()))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(server = %self.server, tool = %self.descriptor.name, "MCP tool call cancelled");
                Err(WrapperError::Cancelled(self.descriptor.name.clone()))
            }
            result = connection.call_tool(&self.descriptor.name, input) => Ok(result),
        }
    }
}

/// Build the name → wrapper mapping for one server's tools.
///
/// A later descriptor with a duplicate name replaces the earlier one.
pub fn build_wrappers(
    server: &str,
    descriptors: &[ToolDescriptor],
    connection: &Weak<McpConnection>,
) -> BTreeMap<String, ToolWrapper> {
    let mut tools = BTreeMap::new();
    for descriptor in descriptors {
        let wrapper = ToolWrapper::new(server, descriptor.clone(), connection.clone());
        if tools.insert(descriptor.name.clone(), wrapper).is_some() {
            tracing::warn!(server, tool = %descriptor.name, "MCP server reported duplicate tool name");
        }
    }
    tools
}

/// Force an object schema with explicit `properties` and no extra keys.
pub fn normalize_schema(schema: &Value) -> Value {
    let mut map = match schema {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    map.insert("type".into(), Value::String("object".into()));
    if !matches!(map.get("properties"), Some(Value::Object(_))) {
        map.insert("properties".into(), Value::Object(Map::new()));
    }
    map.insert("additionalProperties".into(), Value::Bool(false));
    Value::Object(map)
}

pub fn qualified_name(server: &str, tool: &str) -> String {
    format!("{QUALIFIED_PREFIX}{server}:{tool}")
}

/// Split `mcp:{server}:{tool}` into its parts.
pub fn parse_qualified_name(name: &str) -> Option<(&str, &str)> {
    let (server, tool) = name.strip_prefix(QUALIFIED_PREFIX)?.split_once(':')?;
    (!server.is_empty() && !tool.is_empty()).then_some((server, tool))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn wrapper(schema: Value) -> ToolWrapper {
        let descriptor = ToolDescriptor {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: schema,
        };
        ToolWrapper::new("fs", descriptor, Weak::new())
    }

    #[test]
    fn normalize_defaults_properties_and_closes_schema() {
        let schema = normalize_schema(&json!({ "type": "object" }));
        assert_eq!(schema["properties"], json!({}));
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn normalize_keeps_declared_properties() {
        let schema = normalize_schema(&json!({
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": true
        }));
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["required"], json!(["path"]));
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn normalize_replaces_non_object_schema() {
        let schema = normalize_schema(&json!(null));
        assert_eq!(
            schema,
            json!({ "type": "object", "properties": {}, "additionalProperties": false })
        );
    }

    #[test]
    fn validate_accepts_declared_arguments() {
        let w = wrapper(json!({
            "type": "object",
            "properties": { "path": { "type": "string" }, "limit": { "type": "integer" } },
            "required": ["path"]
        }));
        assert!(w.validate_input(&json!({ "path": "/tmp/x" })).is_ok());
        assert!(w.validate_input(&json!({ "path": "/tmp/x", "limit": 3 })).is_ok());
    }

    #[test]
    fn validate_rejects_undeclared_and_missing() {
        let w = wrapper(json!({
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        }));
        let err = w.validate_input(&json!({ "path": "a", "mode": "rw" })).unwrap_err();
        assert!(err.to_string().contains("unexpected argument \"mode\""));

        let err = w.validate_input(&json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required argument \"path\""));

        let err = w.validate_input(&json!([1])).unwrap_err();
        assert!(matches!(err, WrapperError::InvalidInput { .. }));
    }

    #[test]
    fn definition_uses_qualified_name_and_normalized_schema() {
        let def = wrapper(json!({})).definition();
        assert_eq!(def.name, "mcp:fs:read_file");
        assert_eq!(def.description, "Read a file");
        assert_eq!(def.parameters["additionalProperties"], false);
    }

    #[test]
    fn parse_qualified_names() {
        assert_eq!(parse_qualified_name("mcp:fs:read_file"), Some(("fs", "read_file")));
        assert_eq!(parse_qualified_name("mcp:fs:ns:tool"), Some(("fs", "ns:tool")));
        assert_eq!(parse_qualified_name("mcp:fs"), None);
        assert_eq!(parse_qualified_name("mcp::tool"), None);
        assert_eq!(parse_qualified_name("exec"), None);
    }

    #[test]
    fn build_wrappers_keys_by_name() {
        let descriptors = vec![
            ToolDescriptor {
                name: "a".into(),
                description: String::new(),
                input_schema: json!({}),
            },
            ToolDescriptor {
                name: "b".into(),
                description: String::new(),
                input_schema: json!({}),
            },
        ];
        let tools = build_wrappers("srv", &descriptors, &Weak::new());
        assert_eq!(tools.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(tools["b"].server(), "srv");
    }

    #[tokio::test]
    async fn cancelled_token_fails_fast() {
        let token = CancellationToken::new();
        token.cancel();
        let err = wrapper(json!({})).execute(json!({}), &token).await.unwrap_err();
        assert_eq!(err, WrapperError::Cancelled("read_file".into()));
    }

    #[tokio::test]
    async fn dropped_connection_is_reported() {
        let err = wrapper(json!({}))
            .execute(Value::Null, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, WrapperError::ConnectionDropped("fs".into()));
    }
}
