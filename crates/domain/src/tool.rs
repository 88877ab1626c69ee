use serde::{Deserialize, Serialize};

/// Tool definition exposed to the orchestrator.
///
/// Every MCP tool wrapper can describe itself in this provider-agnostic
/// shape; the orchestrator hands it to the model unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}
