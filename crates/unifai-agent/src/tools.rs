//! Platform services exposed to a model as function tools
//!
//! Two dynamic tools let the model discover and call any service:
//! `search_services` and `invoke_service`. Specific toolkits or actions can
//! also be exposed directly ("static" tools), one function per action.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use unifai_core::{ApiClient, ApiError};

use crate::llm::{ChatMessage, ToolCall, ToolDefinition};

pub const SEARCH_SERVICES: &str = "search_services";
pub const INVOKE_SERVICE: &str = "invoke_service";

const STATIC_TOOLS_LIMIT: u32 = 100;

const PAYMENT_DESCRIPTION: &str = "Amount to authorize in USD. \
Positive number means you will be charged no more than this amount, \
negative number means you are requesting to get paid for at least this amount.";

/// The HTTP calls the tools client needs
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    async fn search(&self, args: &Value) -> Result<Value, ApiError>;
    async fn call(&self, args: &Value) -> Result<Value, ApiError>;
}

#[async_trait]
impl ServiceBackend for ApiClient {
    async fn search(&self, args: &Value) -> Result<Value, ApiError> {
        self.search_tools(args).await
    }

    async fn call(&self, args: &Value) -> Result<Value, ApiError> {
        self.call_tool(args).await
    }
}

/// `search_services` and `invoke_service`
pub fn dynamic_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            SEARCH_SERVICES,
            format!(
                "Search for services. The services cover a wide range of domains including data sources, APIs and SDKs. \
                 Try searching whenever you need to use a service. \
                 Returned actions should ONLY be used in {INVOKE_SERVICE}. \
                 This is not web search; to search the web, search for web search services."
            ),
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What you want to do or which services you want to use"
                    },
                    "limit": {
                        "type": "number",
                        "description": "Maximum number of services to return, between 1 and 100, default 10"
                    }
                },
                "required": ["query"]
            }),
        ),
        ToolDefinition::function(
            INVOKE_SERVICE,
            format!("Call a service returned by {SEARCH_SERVICES}"),
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "description": format!("The exact action to call from the {SEARCH_SERVICES} result")
                    },
                    "payload": {
                        "type": "string",
                        "description": format!(
                            "Action payload following the payload schema in the {SEARCH_SERVICES} result. \
                             Either the JSON object itself or its JSON-encoded string."
                        )
                    },
                    "payment": {
                        "type": "number",
                        "description": format!(
                            "{PAYMENT_DESCRIPTION} Only include this field if the action includes payment information."
                        )
                    }
                },
                "required": ["action", "payload"]
            }),
        ),
    ]
}

/// Turn a `search_tools` result into one function per action.
/// Entries without an action name are skipped.
pub fn static_tools_from(actions: &Value) -> Vec<ToolDefinition> {
    let Some(items) = actions.as_array() else {
        warn!("Static tool search returned a non-list result");
        return Vec::new();
    };

    let mut tools = Vec::new();
    for item in items {
        let name = item.get("action").and_then(Value::as_str).unwrap_or_default();
        if name.is_empty() {
            warn!("Skipping action without a name: {}", item);
            continue;
        }
        let description = item
            .get("description")
            .map(describe)
            .unwrap_or_default();
        let payload_schema = item.get("payload").map(describe).unwrap_or_else(|| "{}".to_string());

        let mut parameters = json!({
            "type": "object",
            "properties": {
                "payload": {
                    "type": "string",
                    "description": format!(
                        "payload is an object or JSON-encoded string of the object with the following properties: {}",
                        payload_schema
                    )
                }
            },
            "required": ["payload"]
        });

        let payment = item.get("payment").filter(|p| is_present(p));
        if let Some(payment) = payment {
            parameters["properties"]["payment"] = json!({
                "type": "number",
                "description": format!(
                    "{} Determine the payment amount based on the following payment information: {}",
                    PAYMENT_DESCRIPTION,
                    describe(payment)
                )
            });
        }

        tools.push(ToolDefinition::function(name, description, parameters));
    }
    tools
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Object(m) => !m.is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => true,
    }
}

/// Decode tool-call arguments given as an object or a JSON string
pub fn parse_arguments(arguments: &Value) -> Result<Value> {
    match arguments {
        Value::String(s) if s.trim().is_empty() => Ok(json!({})),
        Value::String(s) => serde_json::from_str(s).context("tool arguments are not valid JSON"),
        other => Ok(other.clone()),
    }
}

/// Client that searches and invokes platform services for a model
#[derive(Clone)]
pub struct Tools {
    backend: Arc<dyn ServiceBackend>,
    static_toolkits: Vec<String>,
    static_actions: Vec<String>,
}

impl Tools {
    pub fn new(backend: Arc<dyn ServiceBackend>) -> Self {
        Self {
            backend,
            static_toolkits: Vec::new(),
            static_actions: Vec::new(),
        }
    }

    /// Expose every action of these toolkits directly
    pub fn with_static_toolkits(mut self, toolkits: Vec<String>) -> Self {
        self.static_toolkits = toolkits;
        self
    }

    /// Expose these actions directly
    pub fn with_static_actions(mut self, actions: Vec<String>) -> Self {
        self.static_actions = actions;
        self
    }

    async fn fetch_static_tools(&self) -> Vec<ToolDefinition> {
        if self.static_toolkits.is_empty() && self.static_actions.is_empty() {
            return Vec::new();
        }
        let mut args = json!({ "limit": STATIC_TOOLS_LIMIT });
        if !self.static_toolkits.is_empty() {
            args["includeToolkits"] = json!(self.static_toolkits);
        }
        if !self.static_actions.is_empty() {
            args["includeActions"] = json!(self.static_actions);
        }
        match self.backend.search(&args).await {
            Ok(actions) => static_tools_from(&actions),
            Err(e) => {
                warn!("Failed to fetch static tools: {}", e);
                Vec::new()
            }
        }
    }

    /// Tool definitions for a chat request
    pub async fn get_tools(&self, include_dynamic: bool) -> Vec<ToolDefinition> {
        let mut tools = if include_dynamic { dynamic_tools() } else { Vec::new() };
        tools.extend(self.fetch_static_tools().await);
        tools
    }

    /// Run one tool call by name
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value> {
        let args = parse_arguments(arguments)?;
        debug!("Calling tool {}", name);
        match name {
            SEARCH_SERVICES => Ok(self.backend.search(&args).await?),
            INVOKE_SERVICE => Ok(self.backend.call(&args).await?),
            _ => {
                let mut body = json!({ "action": name });
                if let (Some(body_map), Some(arg_map)) = (body.as_object_mut(), args.as_object()) {
                    for (k, v) in arg_map {
                        body_map.insert(k.clone(), v.clone());
                    }
                }
                self.backend
                    .call(&body)
                    .await
                    .map_err(|e| anyhow!("Failed to call tool {}: {}", name, e))
            }
        }
    }

    /// Run model tool calls with at most `concurrency` in flight.
    ///
    /// Returns one `tool` message per call, in call order. Failures become
    /// `{"error": "..."}` results.
    pub async fn call_tools(&self, calls: &[ToolCall], concurrency: usize) -> Vec<ChatMessage> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let futures = calls.iter().map(|call| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await;
                let arguments = Value::String(call.function.arguments.clone());
                let result = match self.call_tool(&call.function.name, &arguments).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("Tool call {} failed: {:#}", call.function.name, e);
                        json!({ "error": format!("{:#}", e) })
                    }
                };
                ChatMessage::tool(call.id.clone(), result.to_string())
            }
        });
        join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records calls; searches echo their args, calls answer `{"ok": action}`
    #[derive(Default)]
    struct FakeBackend {
        searches: Mutex<Vec<Value>>,
        calls: Mutex<Vec<Value>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_search: bool,
    }

    #[async_trait]
    impl ServiceBackend for FakeBackend {
        async fn search(&self, args: &Value) -> Result<Value, ApiError> {
            self.searches.lock().unwrap().push(args.clone());
            if self.fail_search {
                return Err(ApiError::Status {
                    url: "http://test/actions/search".to_string(),
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    body: "down".to_string(),
                });
            }
            Ok(json!([
                {"action": "Weather--1--now", "description": "Current weather", "payload": {"city": "string"}},
                {"action": "", "description": "broken"},
                {"action": "Paid--2--quote", "description": "Quote", "payload": "{}", "payment": "0.01 USD per call"}
            ]))
        }

        async fn call(&self, args: &Value) -> Result<Value, ApiError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(args.clone());
            if args["action"] == "broken" {
                return Err(ApiError::Status {
                    url: "http://test/actions/call".to_string(),
                    status: reqwest::StatusCode::BAD_REQUEST,
                    body: "no such action".to_string(),
                });
            }
            Ok(json!({"ok": args["action"]}))
        }
    }

    #[test]
    fn test_dynamic_tools() {
        let tools = dynamic_tools();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name(), SEARCH_SERVICES);
        assert_eq!(tools[0].function.parameters["required"], json!(["query"]));
        assert_eq!(tools[1].name(), INVOKE_SERVICE);
        assert_eq!(tools[1].function.parameters["required"], json!(["action", "payload"]));
    }

    #[test]
    fn test_static_tools_from() {
        let tools = static_tools_from(&json!([
            {"action": "A", "description": "first", "payload": {"x": "int"}},
            {"description": "nameless"},
            {"action": "B", "description": "paid", "payload": "text", "payment": {"price": 1}}
        ]));
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name(), "A");
        let props = &tools[0].function.parameters["properties"];
        assert!(props["payload"]["description"].as_str().unwrap().contains(r#"{"x":"int"}"#));
        assert!(props.get("payment").is_none());
        assert!(tools[1].function.parameters["properties"]["payment"]["description"]
            .as_str()
            .unwrap()
            .contains("price"));
    }

    #[test]
    fn test_static_tools_from_non_list() {
        assert!(static_tools_from(&json!({"error": "x"})).is_empty());
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(&json!(r#"{"a":1}"#)).unwrap(), json!({"a": 1}));
        assert_eq!(parse_arguments(&json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert_eq!(parse_arguments(&json!("")).unwrap(), json!({}));
        assert!(parse_arguments(&json!("{oops")).is_err());
    }

    #[tokio::test]
    async fn test_get_tools_with_static() {
        let backend = Arc::new(FakeBackend::default());
        let tools = Tools::new(backend.clone())
            .with_static_toolkits(vec!["1".to_string()])
            .with_static_actions(vec!["Paid--2--quote".to_string()]);
        let defs = tools.get_tools(true).await;
        let names: Vec<&str> = defs.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec![SEARCH_SERVICES, INVOKE_SERVICE, "Weather--1--now", "Paid--2--quote"]);

        let search = &backend.searches.lock().unwrap()[0];
        assert_eq!(search["limit"], 100);
        assert_eq!(search["includeToolkits"], json!(["1"]));
        assert_eq!(search["includeActions"], json!(["Paid--2--quote"]));
    }

    #[tokio::test]
    async fn test_get_tools_without_static_skips_search() {
        let backend = Arc::new(FakeBackend::default());
        let defs = Tools::new(backend.clone()).get_tools(false).await;
        assert!(defs.is_empty());
        assert!(backend.searches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_fetch_failure_yields_no_static_tools() {
        let backend = Arc::new(FakeBackend {
            fail_search: true,
            ..Default::default()
        });
        let defs = Tools::new(backend)
            .with_static_actions(vec!["x".to_string()])
            .get_tools(true)
            .await;
        assert_eq!(defs.len(), 2);
    }

    #[tokio::test]
    async fn test_call_tool_routes() {
        let backend = Arc::new(FakeBackend::default());
        let tools = Tools::new(backend.clone());

        let found = tools
            .call_tool(SEARCH_SERVICES, &json!(r#"{"query":"weather"}"#))
            .await
            .unwrap();
        assert!(found.is_array());

        let invoked = tools
            .call_tool(INVOKE_SERVICE, &json!({"action": "Weather--1--now", "payload": {"city": "Oslo"}}))
            .await
            .unwrap();
        assert_eq!(invoked["ok"], "Weather--1--now");

        let direct = tools
            .call_tool("Weather--1--now", &json!({"payload": "{\"city\":\"Oslo\"}", "payment": 0.1}))
            .await
            .unwrap();
        assert_eq!(direct["ok"], "Weather--1--now");
        let last = backend.calls.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last["payment"], 0.1);
        assert_eq!(last["payload"], "{\"city\":\"Oslo\"}");
    }

    #[tokio::test]
    async fn test_call_tool_named_failure() {
        let tools = Tools::new(Arc::new(FakeBackend::default()));
        let err = tools.call_tool("broken", &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Failed to call tool broken"));
    }

    #[tokio::test]
    async fn test_call_tools_preserves_order_and_errors() {
        let backend = Arc::new(FakeBackend::default());
        let tools = Tools::new(backend.clone());
        let calls = vec![
            ToolCall::new("c1", INVOKE_SERVICE, r#"{"action":"first","payload":{}}"#),
            ToolCall::new("c2", "broken", "{}"),
            ToolCall::new("c3", INVOKE_SERVICE, "not json"),
            ToolCall::new("c4", INVOKE_SERVICE, r#"{"action":"last","payload":{}}"#),
        ];
        let results = tools.call_tools(&calls, 2).await;

        let ids: Vec<&str> = results.iter().map(|m| m.tool_call_id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);

        let parsed: Vec<Value> = results
            .iter()
            .map(|m| serde_json::from_str(m.content.as_deref().unwrap()).unwrap())
            .collect();
        assert_eq!(parsed[0]["ok"], "first");
        assert!(parsed[1]["error"].as_str().unwrap().contains("broken"));
        assert!(parsed[2]["error"].as_str().unwrap().contains("not valid JSON"));
        assert_eq!(parsed[3]["ok"], "last");
        assert!(backend.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_call_tools_concurrency_one_is_sequential() {
        let backend = Arc::new(FakeBackend::default());
        let tools = Tools::new(backend.clone());
        let calls: Vec<ToolCall> = (0..4)
            .map(|i| ToolCall::new(format!("c{i}"), INVOKE_SERVICE, r#"{"action":"a","payload":{}}"#))
            .collect();
        let results = tools.call_tools(&calls, 0).await;
        assert_eq!(results.len(), 4);
        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
