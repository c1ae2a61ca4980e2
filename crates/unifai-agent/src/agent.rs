//! Chat agent: answers user messages with a model that can search and call
//! platform services

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use unifai_core::{ApiClient, Config};

use crate::conversation::{ConversationHistory, InMemoryHistory, Interaction, replayable};
use crate::history::HistoryClassifier;
use crate::llm::{ChatMessage, LlmProvider, OpenAiCompatProvider, ToolCall, UsageTracker};
use crate::models::{DEFAULT_KEY, ModelMap};
use crate::prompts::{self, PromptStore};
use crate::tools::{INVOKE_SERVICE, SEARCH_SERVICES, Tools, parse_arguments};

pub const FALLBACK_REPLY: &str = "Sorry, something went wrong.";

const DEFAULT_HISTORY_COUNT: usize = 10;
const DEFAULT_MAX_TOOL_ROUNDS: usize = 16;

/// A tool the model called while answering
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Text for the user, progress lines included
    pub text: String,
    pub tools_used: Vec<ToolUse>,
    /// Everything sent to the model on the final turn
    pub messages: Vec<ChatMessage>,
    /// The user message and everything produced answering it
    pub interaction: Interaction,
}

/// Progress line shown to the user for a dynamic tool call
fn progress_line(call: &ToolCall) -> Option<String> {
    let args = parse_arguments(&Value::String(call.function.arguments.clone())).unwrap_or_default();
    let field = |key: &str| match args.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    match call.function.name.as_str() {
        SEARCH_SERVICES => Some(format!("Searching services: {}...", field("query"))),
        INVOKE_SERVICE => Some(format!("Invoking service: {}...", field("action"))),
        _ => None,
    }
}

pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<PromptStore>,
    models: Arc<ModelMap>,
    usage: Arc<UsageTracker>,
    tools: Tools,
    classifier: HistoryClassifier,
    history: Arc<dyn ConversationHistory>,
    history_count: usize,
    max_tool_rounds: usize,
    tool_concurrency: usize,
    chat_locks: ChatLocks,
}

impl Agent {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Tools) -> Self {
        Self::with_parts(provider, tools, Arc::new(ModelMap::default()))
    }

    fn with_parts(provider: Arc<dyn LlmProvider>, tools: Tools, models: Arc<ModelMap>) -> Self {
        let prompts = Arc::new(PromptStore::new());
        let usage = Arc::new(UsageTracker::new());
        let classifier = HistoryClassifier::new(provider.clone(), prompts.clone(), models.clone())
            .with_usage(usage.clone());
        Self {
            provider,
            prompts,
            models,
            usage,
            tools,
            classifier,
            history: Arc::new(InMemoryHistory::default()),
            history_count: DEFAULT_HISTORY_COUNT,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            tool_concurrency: 1,
            chat_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// OpenAI-compatible provider plus platform tools, both from config
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = OpenAiCompatProvider::from_config(&config.llm)?;
        let api = ApiClient::new(config.api_key.clone(), config.api_endpoint.clone());
        let tools = Tools::new(Arc::new(api));
        Ok(Self::with_parts(
            Arc::new(provider),
            tools,
            Arc::new(ModelMap::with_default(config.llm.model.clone())),
        ))
    }

    pub fn with_history(mut self, history: Arc<dyn ConversationHistory>) -> Self {
        self.history = history;
        self
    }

    /// How many past interactions to replay when history is needed
    pub fn with_history_count(mut self, count: usize) -> Self {
        self.history_count = count;
        self
    }

    pub fn with_history_threshold(mut self, threshold: u8) -> Self {
        self.classifier = HistoryClassifier::new(self.provider.clone(), self.prompts.clone(), self.models.clone())
            .with_usage(self.usage.clone())
            .with_threshold(threshold);
        self
    }

    pub fn with_tool_concurrency(mut self, concurrency: usize) -> Self {
        self.tool_concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn prompts(&self) -> &PromptStore {
        &self.prompts
    }

    pub fn models(&self) -> &ModelMap {
        &self.models
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn classifier(&self) -> &HistoryClassifier {
        &self.classifier
    }

    /// Answer one message without taking the chat lock or storing the result
    pub async fn get_reply(&self, chat_id: &str, message: &str) -> Result<AgentReply> {
        let use_history = self.classifier.needs_history(message).await;

        let mut messages = vec![ChatMessage::system(self.prompts.get(prompts::SYSTEM))];
        if use_history {
            match self.history.recent(chat_id, self.history_count).await {
                Ok(past) => {
                    let replay = replayable(&past);
                    debug!("Replaying {} message(s) of history", replay.len());
                    messages.extend(replay);
                }
                Err(e) => warn!("Failed to load history for chat {}: {:#}", chat_id, e),
            }
        }

        let user = ChatMessage::user(message);
        messages.push(user.clone());
        let mut interaction = vec![user];

        let tool_defs = self.tools.get_tools(true).await;
        let model = self.models.get(DEFAULT_KEY);
        let mut reply = String::new();
        let mut tools_used = Vec::new();
        let mut finished = false;

        for _ in 0..self.max_tool_rounds {
            let response = self
                .provider
                .chat(&model, &messages, &tool_defs)
                .await
                .context("chat completion failed")?;
            self.usage.record(response.usage);
            let assistant = response.message;

            if assistant.text_content().is_some() || !assistant.tool_calls.is_empty() {
                messages.push(assistant.clone());
                interaction.push(assistant.clone());
            }
            if let Some(text) = assistant.text_content() {
                reply.push_str(text);
                reply.push('\n');
            }
            if assistant.tool_calls.is_empty() {
                finished = true;
                break;
            }

            for call in &assistant.tool_calls {
                tools_used.push(ToolUse {
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                });
                if let Some(line) = progress_line(call) {
                    reply.push_str(&line);
                    reply.push('\n');
                }
            }

            let results = self
                .tools
                .call_tools(&assistant.tool_calls, self.tool_concurrency)
                .await;
            if results.is_empty() {
                finished = true;
                break;
            }
            messages.extend(results.iter().cloned());
            interaction.extend(results);
        }

        if !finished {
            warn!("Stopped after {} tool rounds", self.max_tool_rounds);
        }

        let text = reply.trim_end_matches('\n');
        Ok(AgentReply {
            text: if text.is_empty() {
                FALLBACK_REPLY.to_string()
            } else {
                text.to_string()
            },
            tools_used,
            messages,
            interaction,
        })
    }

    /// Answer a message and record the interaction. Messages of one chat
    /// are handled one at a time.
    pub async fn process_message(&self, chat_id: &str, message: &str) -> Result<String> {
        let slot = {
            let mut locks = self
                .chat_locks
                .lock()
                .map_err(|_| anyhow!("chat lock table poisoned"))?;
            ChatSlot {
                locks: &self.chat_locks,
                chat_id: chat_id.to_string(),
                lock: locks.entry(chat_id.to_string()).or_default().clone(),
            }
        };
        let _guard = slot.lock.lock().await;

        info!("Processing message for chat {}", chat_id);
        let reply = self.get_reply(chat_id, message).await?;
        if let Err(e) = self.history.append(chat_id, reply.interaction).await {
            warn!("Failed to store interaction for chat {}: {:#}", chat_id, e);
        }
        Ok(reply.text)
    }
}

type ChatLocks = std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A chat's entry in the lock table, removed when its last holder leaves
struct ChatSlot<'a> {
    locks: &'a ChatLocks,
    chat_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for ChatSlot<'_> {
    fn drop(&mut self) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // Clones are only taken under the table lock; two means the table and us
        let ours = locks
            .get(&self.chat_id)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock));
        if ours && Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.chat_id);
        }
    }
}
