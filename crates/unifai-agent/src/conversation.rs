//! Stored conversation turns, fed back to the model for follow-ups

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::LazyLock;
use tokio::sync::Mutex;

use crate::llm::{ChatMessage, ChatRole};

static TOOL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("tool name pattern is valid")
});

/// Names the chat-completions API accepts for functions
pub fn is_valid_tool_name(name: &str) -> bool {
    TOOL_NAME.is_match(name)
}

/// One user message and everything produced while answering it
pub type Interaction = Vec<ChatMessage>;

/// Where past interactions come from. Storage is up to the caller.
#[async_trait]
pub trait ConversationHistory: Send + Sync {
    /// Up to `count` most recent interactions of a chat, oldest first
    async fn recent(&self, chat_id: &str, count: usize) -> Result<Vec<Interaction>>;

    async fn append(&self, chat_id: &str, interaction: Interaction) -> Result<()>;
}

/// Bounded per-chat history kept in memory
#[derive(Debug)]
pub struct InMemoryHistory {
    capacity: usize,
    chats: Mutex<HashMap<String, VecDeque<Interaction>>>,
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

impl InMemoryHistory {
    /// Keep at most `capacity` interactions per chat
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            chats: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConversationHistory for InMemoryHistory {
    async fn recent(&self, chat_id: &str, count: usize) -> Result<Vec<Interaction>> {
        let chats = self.chats.lock().await;
        let Some(turns) = chats.get(chat_id) else {
            return Ok(Vec::new());
        };
        let skip = turns.len().saturating_sub(count);
        Ok(turns.iter().skip(skip).cloned().collect())
    }

    async fn append(&self, chat_id: &str, interaction: Interaction) -> Result<()> {
        let mut chats = self.chats.lock().await;
        let turns = chats.entry(chat_id.to_string()).or_default();
        turns.push_back(interaction);
        while turns.len() > self.capacity {
            turns.pop_front();
        }
        Ok(())
    }
}

/// Flatten stored interactions into messages the provider will accept.
///
/// Assistant turns that call a tool with an invalid name are dropped along
/// with their tool results. Tool results that do not follow a kept message
/// are dropped too.
pub fn replayable(interactions: &[Interaction]) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    for interaction in interactions {
        let mut dropped_calls: HashSet<&str> = HashSet::new();
        let mut has_non_tool = false;
        for msg in interaction {
            if msg.role == ChatRole::Tool {
                let orphan = msg
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| dropped_calls.contains(id));
                if has_non_tool && !orphan {
                    out.push(msg.clone());
                }
                continue;
            }
            if msg.tool_calls.iter().any(|c| !is_valid_tool_name(&c.function.name)) {
                dropped_calls.extend(msg.tool_calls.iter().map(|c| c.id.as_str()));
                continue;
            }
            has_non_tool = true;
            out.push(msg.clone());
        }
    }
    out
}
