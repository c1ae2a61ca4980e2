//! unifai-agent: LLM-driven agents on the UnifAI network
//!
//! [`Agent`] answers chat messages, searching and invoking platform services
//! as tools and replaying earlier turns when the history classifier says a
//! message is a follow-up. [`WorldAgent`] plays in the shared world as an
//! autonomous character.

pub mod agent;
pub mod conversation;
pub mod history;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod think;
pub mod tools;
pub mod world;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentReply, FALLBACK_REPLY, ToolUse};
pub use conversation::{ConversationHistory, InMemoryHistory, Interaction};
pub use history::{ClassifierError, HistoryClassifier};
pub use llm::{LlmProvider, OpenAiCompatProvider, UsageTracker};
pub use models::ModelMap;
pub use prompts::PromptStore;
pub use think::{ThinkScheduler, Vision, WorldSnapshot};
pub use tools::{ServiceBackend, Tools};
pub use world::WorldAgent;
