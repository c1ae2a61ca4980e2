//! HTTP client for the platform's REST API

use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ApiError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TOOL_TIMEOUT: Duration = Duration::from_secs(50);

/// Authenticated client for one API endpoint.
///
/// The API key goes into the `Authorization` header verbatim; the platform
/// does not use a bearer prefix.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    api_key: String,
    endpoint: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Body of a toolkit metadata update
#[derive(Debug, Default, Serialize)]
pub struct ToolkitFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ApiClient {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    /// Send one request and decode the JSON body.
    ///
    /// `query` is sent as URL parameters, `body` as a JSON payload.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: Option<&Value>,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, ApiError> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut req = self
            .http
            .request(method, &url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT));

        if let Some(q) = query {
            req = req.query(&query_pairs(q));
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req.send().await.map_err(|source| ApiError::Transport {
            url: url.clone(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { url, status, body });
        }

        resp.json()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }

    /// Update the toolkit's display name and/or description
    pub async fn update_toolkit(&self, fields: &ToolkitFields) -> Result<Value, ApiError> {
        let body = serde_json::to_value(fields).unwrap_or(Value::Null);
        let result = self
            .request(Method::POST, "/toolkits/fields/", None, Some(&body), None)
            .await?;
        info!("Updated toolkit fields");
        Ok(result)
    }

    /// Search actions published on the platform
    pub async fn search_tools(&self, args: &Value) -> Result<Value, ApiError> {
        self.request(Method::GET, "/actions/search", Some(args), None, None)
            .await
    }

    /// Invoke an action through the platform; the platform relays it to the toolkit
    pub async fn call_tool(&self, args: &Value) -> Result<Value, ApiError> {
        self.request(
            Method::POST,
            "/actions/call",
            None,
            Some(args),
            Some(CALL_TOOL_TIMEOUT),
        )
        .await
    }

    /// Publish a short story about what the agent has been doing
    pub async fn post_story(&self, text: &str, image_url: &str) -> Result<Value, ApiError> {
        let body = serde_json::json!({
            "story": {
                "text": text,
                "imageURL": image_url,
            }
        });
        self.request(Method::POST, "/stories", None, Some(&body), None)
            .await
    }
}

/// Flatten a JSON object into query pairs. Arrays repeat the key.
fn query_pairs(value: &Value) -> Vec<(String, String)> {
    let Some(map) = value.as_object() else {
        return Vec::new();
    };
    let mut pairs = Vec::new();
    for (key, v) in map {
        match v {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    pairs.push((key.clone(), scalar_to_string(item)));
                }
            }
            other => pairs.push((key.clone(), scalar_to_string(other))),
        }
    }
    pairs
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash() {
        let client = ApiClient::new("k", "http://localhost:9000/api/");
        assert_eq!(client.endpoint(), "http://localhost:9000/api");
        assert_eq!(
            client.url("/actions/search"),
            "http://localhost:9000/api/actions/search"
        );
        assert_eq!(client.url("stories"), "http://localhost:9000/api/stories");
    }

    #[test]
    fn test_set_endpoint() {
        let mut client = ApiClient::new("k", "http://a");
        client.set_endpoint("http://b/");
        assert_eq!(client.endpoint(), "http://b");
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = ApiClient::new("secret-key-value", "http://localhost");
        let debug = format!("{:?}", client);
        assert!(!debug.contains("secret-key-value"));
        assert!(debug.contains("localhost"));
    }

    #[test]
    fn test_query_pairs() {
        let pairs = query_pairs(&serde_json::json!({
            "query": "weather",
            "limit": 10,
            "includeToolkits": ["10", "11"],
            "skip": null,
        }));
        assert!(pairs.contains(&("query".to_string(), "weather".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "10".to_string())));
        assert!(pairs.contains(&("includeToolkits".to_string(), "10".to_string())));
        assert!(pairs.contains(&("includeToolkits".to_string(), "11".to_string())));
        assert_eq!(pairs.len(), 4);
    }

    #[test]
    fn test_query_pairs_non_object() {
        assert!(query_pairs(&serde_json::json!("nope")).is_empty());
    }

    #[test]
    fn test_toolkit_fields_skip_none() {
        let fields = ToolkitFields {
            name: Some("Echo".to_string()),
            description: None,
        };
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json["name"], "Echo");
        assert!(json.get("description").is_none());
    }

    #[tokio::test]
    async fn test_search_tools_connection_refused() {
        let client = ApiClient::new("k", "http://127.0.0.1:1");
        let result = client.search_tools(&serde_json::json!({"query": "x"})).await;
        assert!(matches!(result, Err(ApiError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_call_tool_connection_refused() {
        let client = ApiClient::new("k", "http://127.0.0.1:1");
        let result = client
            .call_tool(&serde_json::json!({"action": "echo", "payload": {}}))
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().status().is_none());
    }
}
