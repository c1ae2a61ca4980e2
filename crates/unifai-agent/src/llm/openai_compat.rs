//! Provider for any OpenAI-compatible chat-completions endpoint

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use unifai_core::config::LlmConfig;

use super::types::{ChatMessage, ChatRequest, ChatResponse, ChatUsage, LlmProvider, StopReason};

pub struct OpenAiCompatProvider {
    http: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(
            config.api_key.clone(),
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn request_body(request: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    fn parse_response(resp: CompletionResponse) -> Result<ChatResponse> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("completion response has no choices"))?;
        let usage = resp
            .usage
            .map(|u| ChatUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        let mut message = choice.message;
        // Some compatible servers leave ids out; tool results need one to refer to
        for call in &mut message.tool_calls {
            if call.id.is_empty() {
                call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }
        }
        Ok(ChatResponse {
            stop_reason: StopReason::from_finish_reason(choice.finish_reason.as_deref()),
            message,
            usage,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn provider_name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(&self, request: ChatRequest<'_>) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            "Chat completion: model={} messages={} tools={}",
            request.model,
            request.messages.len(),
            request.tools.len()
        );

        let mut req = self.http.post(&url).json(&Self::request_body(&request));
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Chat completion failed: HTTP {} {}", status, body);
        }

        let parsed: CompletionResponse = resp
            .json()
            .await
            .context("Failed to parse chat completion response")?;
        Self::parse_response(parsed)
    }
}
