//! Scripted LLM provider for unit tests

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::llm::{ChatMessage, ChatRequest, ChatResponse, ChatUsage, LlmProvider, StopReason, ToolCall};

/// What one recorded request looked like
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
    pub json_mode: bool,
}

/// Replays queued replies in order and records every request
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ChatMessage, String>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, content: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(ChatMessage::assistant(content)));
        self
    }

    pub fn tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.replies.lock().unwrap().push_back(Ok(ChatMessage {
            role: crate::llm::ChatRole::Assistant,
            content: None,
            tool_calls: calls,
            tool_call_id: None,
        }));
        self
    }

    pub fn fail(self, error: &str) -> Self {
        self.replies.lock().unwrap().push_back(Err(error.to_string()));
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ChatRequest<'_>) -> Result<ChatResponse> {
        self.seen.lock().unwrap().push(SeenRequest {
            model: request.model.to_string(),
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name().to_string()).collect(),
            json_mode: request.json_mode,
        });
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply left"))?;
        let message = next.map_err(|e| anyhow!(e))?;
        let stop_reason = if message.tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };
        Ok(ChatResponse {
            message,
            stop_reason,
            usage: ChatUsage {
                input_tokens: 10,
                output_tokens: 2,
            },
        })
    }
}

/// Service backend answering every search with `search_result` and every
/// call with `{"ok": <action>}`
pub struct StaticBackend {
    pub search_result: serde_json::Value,
    pub calls: Mutex<Vec<serde_json::Value>>,
}

impl StaticBackend {
    pub fn new(search_result: serde_json::Value) -> Self {
        Self {
            search_result,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl crate::tools::ServiceBackend for StaticBackend {
    async fn search(&self, _args: &serde_json::Value) -> Result<serde_json::Value, unifai_core::ApiError> {
        Ok(self.search_result.clone())
    }

    async fn call(&self, args: &serde_json::Value) -> Result<serde_json::Value, unifai_core::ApiError> {
        self.calls.lock().unwrap().push(args.clone());
        Ok(serde_json::json!({ "ok": args["action"] }))
    }
}
