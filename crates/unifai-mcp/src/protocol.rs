//! JSON-RPC 2.0 and MCP message shapes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use unifai_agent::llm::ToolDefinition;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "unifai-tools";

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent on notifications
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: &'static str,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

#[derive(Debug, Serialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
}

/// Entry of a `tools/list` answer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<&ToolDefinition> for McpTool {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            name: def.function.name.clone(),
            description: def.function.description.clone(),
            input_schema: def.function.parameters.clone(),
        }
    }
}

/// Answer of `tools/call`: one text block holding the service's JSON result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<TextContent>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Debug, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl ToolCallResult {
    pub fn json(value: &Value) -> Self {
        Self {
            content: vec![TextContent {
                kind: "text",
                text: value.to_string(),
            }],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![TextContent {
                kind: "text",
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_from_definition() {
        let def = ToolDefinition::function("search_services", "Search", json!({"type": "object"}));
        let tool = serde_json::to_value(McpTool::from(&def)).unwrap();
        assert_eq!(tool["name"], "search_services");
        assert_eq!(tool["inputSchema"]["type"], "object");
    }

    #[test]
    fn test_call_result_shapes() {
        let ok = serde_json::to_value(ToolCallResult::json(&json!({"temp": 21}))).unwrap();
        assert_eq!(ok["content"][0]["type"], "text");
        assert_eq!(ok["content"][0]["text"], r#"{"temp":21}"#);
        assert!(ok.get("isError").is_none());

        let err = serde_json::to_value(ToolCallResult::error("boom")).unwrap();
        assert_eq!(err["isError"], true);
    }

    #[test]
    fn test_error_response_omits_result() {
        let resp = serde_json::to_value(JsonRpcResponse::error(json!(1), METHOD_NOT_FOUND, "nope")).unwrap();
        assert!(resp.get("result").is_none());
        assert_eq!(resp["error"]["code"], -32601);
        assert_eq!(resp["jsonrpc"], "2.0");
    }

    #[test]
    fn test_notification_has_no_id() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(req.id.is_none());
        assert!(req.params.is_null());
    }
}
