//! LLM abstraction: provider trait, an OpenAI-compatible provider and usage
//! accounting

pub mod openai_compat;
pub mod types;
pub mod usage;

pub use openai_compat::OpenAiCompatProvider;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatUsage, LlmProvider, StopReason, ToolCall,
    ToolDefinition,
};
pub use usage::{UsageStats, UsageTracker};
