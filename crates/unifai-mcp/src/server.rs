//! MCP server over STDIO
//!
//! Newline-delimited JSON-RPC: one request per line in, one response per
//! line out. Notifications get no response. Logs must go to stderr; stdout
//! carries the protocol.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use unifai_agent::Tools;
use unifai_agent::tools::dynamic_tools;

use crate::protocol::*;

/// Longest slice of a frame written to the debug log
const LOG_PREVIEW: usize = 200;

fn preview(text: &str) -> &str {
    match text.char_indices().nth(LOG_PREVIEW) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

pub struct McpServer {
    tools: Tools,
}

impl McpServer {
    pub fn new(tools: Tools) -> Self {
        Self { tools }
    }

    /// The tools every client sees
    pub fn list_tools(&self) -> Vec<McpTool> {
        dynamic_tools().iter().map(McpTool::from).collect()
    }

    pub async fn serve_stdio(&self) -> Result<()> {
        info!("MCP server starting on STDIO");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await?;
        info!("MCP server STDIO closed");
        Ok(())
    }

    /// Answer requests from `reader` until it closes
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!("MCP received: {}", preview(line));

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    warn!("Invalid JSON-RPC request: {}", e);
                    Some(JsonRpcResponse::error(
                        Value::Null,
                        PARSE_ERROR,
                        format!("Parse error: {}", e),
                    ))
                }
            };
            if let Some(response) = response {
                write_response(&mut writer, &response).await?;
            }
        }
        Ok(())
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone().unwrap_or(Value::Null);

        let result = match request.method.as_str() {
            "initialize" => serde_json::to_value(InitializeResult {
                protocol_version: PROTOCOL_VERSION,
                capabilities: ServerCapabilities {
                    tools: ToolsCapability { list_changed: false },
                },
                server_info: ServerInfo {
                    name: SERVER_NAME,
                    version: env!("CARGO_PKG_VERSION"),
                },
            }),
            "notifications/initialized" => {
                info!("MCP client initialized");
                return None;
            }
            "ping" => Ok(json!({})),
            "tools/list" => {
                let tools = self.list_tools();
                debug!("MCP tools/list: {} tools", tools.len());
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let Some(name) = request
                    .params
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                else {
                    return Some(JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        "Missing 'name' parameter",
                    ));
                };
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                serde_json::to_value(self.call_tool(name, &arguments).await)
            }
            other => {
                warn!("MCP unknown method: {}", other);
                if request.id.is_none() {
                    return None;
                }
                return Some(JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Unknown method: {}", other),
                ));
            }
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
        })
    }

    /// Run a tool. Service failures are reported to the client as an error
    /// result rather than a protocol error.
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> ToolCallResult {
        info!("MCP tools/call: {}", name);
        match self.tools.call_tool(name, arguments).await {
            Ok(result) => ToolCallResult::json(&result),
            Err(e) => {
                warn!("Tool {} failed: {:#}", name, e);
                ToolCallResult::error(format!("{:#}", e))
            }
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &JsonRpcResponse) -> Result<()> {
    let text = serde_json::to_string(response).context("failed to serialize response")?;
    debug!("MCP sending: {}", preview(&text));
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use unifai_agent::ServiceBackend;
    use unifai_agent::tools::{INVOKE_SERVICE, SEARCH_SERVICES};
    use unifai_core::ApiError;

    /// Searches return one weather action; calls echo their body
    #[derive(Default)]
    struct EchoBackend {
        calls: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl ServiceBackend for EchoBackend {
        async fn search(&self, args: &Value) -> std::result::Result<Value, ApiError> {
            Ok(json!([{"action": "Weather--1--now", "query": args["query"]}]))
        }

        async fn call(&self, args: &Value) -> std::result::Result<Value, ApiError> {
            self.calls.lock().unwrap().push(args.clone());
            Ok(json!({"payload": {"sky": "clear"}, "echo": args}))
        }
    }

    fn make_server() -> (McpServer, Arc<EchoBackend>) {
        let backend = Arc::new(EchoBackend::default());
        (McpServer::new(Tools::new(backend.clone())), backend)
    }

    fn request(id: Option<i64>, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: id.map(|i| json!(i)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_handle_initialize() {
        let (server, _) = make_server();
        let resp = server
            .handle_request(request(Some(1), "initialize", json!({})))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "unifai-tools");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
    }

    #[tokio::test]
    async fn test_handle_tools_list() {
        let (server, _) = make_server();
        let resp = server
            .handle_request(request(Some(2), "tools/list", json!({})))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        let names: Vec<&str> = result["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec![SEARCH_SERVICES, INVOKE_SERVICE]);
        assert_eq!(result["tools"][0]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn test_handle_tools_call_search() {
        let (server, _) = make_server();
        let resp = server
            .handle_request(request(
                Some(3),
                "tools/call",
                json!({"name": SEARCH_SERVICES, "arguments": {"query": "weather"}}),
            ))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert!(result.get("isError").is_none());
        let text = result["content"][0]["text"].as_str().unwrap();
        let found: Value = serde_json::from_str(text).unwrap();
        assert_eq!(found[0]["action"], "Weather--1--now");
        assert_eq!(found[0]["query"], "weather");
    }

    #[tokio::test]
    async fn test_handle_tools_call_invoke() {
        let (server, backend) = make_server();
        let args = json!({"action": "Weather--1--now", "payload": {"city": "Oslo"}, "payment": 0});
        let resp = server
            .handle_request(request(
                Some(4),
                "tools/call",
                json!({"name": INVOKE_SERVICE, "arguments": args}),
            ))
            .await
            .unwrap();
        let text = resp.result.unwrap()["content"][0]["text"].as_str().unwrap().to_string();
        let called: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(called["payload"]["sky"], "clear");
        assert_eq!(backend.calls.lock().unwrap()[0]["payload"]["city"], "Oslo");
    }

    #[tokio::test]
    async fn test_handle_tools_call_bad_arguments() {
        let (server, _) = make_server();
        let resp = server
            .handle_request(request(
                Some(5),
                "tools/call",
                json!({"name": SEARCH_SERVICES, "arguments": "{not json"}),
            ))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_handle_tools_call_missing_name() {
        let (server, _) = make_server();
        let resp = server
            .handle_request(request(Some(6), "tools/call", json!({})))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_handle_ping() {
        let (server, _) = make_server();
        let resp = server
            .handle_request(request(Some(7), "ping", json!({})))
            .await
            .unwrap();
        assert_eq!(resp.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_handle_unknown_method() {
        let (server, _) = make_server();
        let resp = server
            .handle_request(request(Some(8), "resources/list", json!({})))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let (server, _) = make_server();
        assert!(
            server
                .handle_request(request(None, "notifications/initialized", json!({})))
                .await
                .is_none()
        );
        assert!(
            server
                .handle_request(request(None, "notifications/cancelled", json!({})))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_serve_line_protocol() {
        let (server, _) = make_server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            "garbage\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
        );
        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).await.unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["id"], Value::Null);
        assert_eq!(responses[1]["error"]["code"], PARSE_ERROR);
        assert_eq!(responses[2]["id"], 2);
        assert_eq!(responses[2]["result"], json!({}));
    }

    #[test]
    fn test_preview_is_char_safe() {
        let long = "é".repeat(300);
        assert_eq!(preview(&long).chars().count(), LOG_PREVIEW);
        assert_eq!(preview("short"), "short");
    }
}
