//! History-need classifier
//!
//! Asks a model how much a message depends on the earlier conversation and
//! turns the answer into a score from 0 (self-contained) to 100 (a clear
//! follow-up). The score is advisory: callers compare it with a threshold.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::llm::{ChatMessage, LlmProvider, UsageTracker};
use crate::models::{HISTORY_KEY, ModelMap};
use crate::prompts::{self, PromptStore};

pub const DEFAULT_THRESHOLD: u8 = 50;

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The model answered with something other than an integer in 0..=100
    #[error("classifier output is not an integer from 0 to 100: {0:?}")]
    Format(String),

    #[error("classifier call failed: {0:#}")]
    Llm(anyhow::Error),
}

/// Parse the model's raw answer
pub fn parse_score(output: &str) -> Result<u8, ClassifierError> {
    let trimmed = output.trim();
    match trimmed.parse::<u8>() {
        Ok(score) if score <= 100 => Ok(score),
        _ => Err(ClassifierError::Format(trimmed.to_string())),
    }
}

pub struct HistoryClassifier {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<PromptStore>,
    models: Arc<ModelMap>,
    usage: Option<Arc<UsageTracker>>,
    threshold: u8,
}

impl HistoryClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>, prompts: Arc<PromptStore>, models: Arc<ModelMap>) -> Self {
        Self {
            provider,
            prompts,
            models,
            usage: None,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold.min(100);
        self
    }

    pub fn with_usage(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Score one message
    pub async fn score(&self, message: &str) -> Result<u8, ClassifierError> {
        let model = self.models.get(HISTORY_KEY);
        let messages = [
            ChatMessage::system(self.prompts.get(prompts::HISTORY)),
            ChatMessage::user(message),
        ];
        let response = self
            .provider
            .chat(&model, &messages, &[])
            .await
            .map_err(ClassifierError::Llm)?;
        if let Some(usage) = &self.usage {
            usage.record(response.usage);
        }
        let raw = response.message.content.unwrap_or_default();
        debug!("History classifier answered {:?}", raw);
        parse_score(&raw)
    }

    /// Whether earlier turns should be loaded. Any failure means no.
    pub async fn needs_history(&self, message: &str) -> bool {
        match self.score(message).await {
            Ok(score) => {
                let use_history = score > self.threshold;
                info!("History score {} (threshold {}): use history = {}", score, self.threshold, use_history);
                use_history
            }
            Err(e) => {
                error!("Could not determine whether to use history: {}", e);
                false
            }
        }
    }
}
