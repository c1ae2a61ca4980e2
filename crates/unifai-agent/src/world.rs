//! Autonomous player in a shared world
//!
//! Connects as `type=player`, folds the streamed frames into a
//! [`ThinkScheduler`], and when a decision is due asks the model (JSON mode)
//! for an observation, a thought and the next action.

use anyhow::{Context, Result, anyhow, bail};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use unifai_core::config::DEFAULT_WS_ENDPOINT;
use unifai_core::{ApiClient, Config};

use crate::llm::{ChatMessage, ChatRequest, LlmProvider, OpenAiCompatProvider, UsageTracker};
use crate::models::{DEFAULT_KEY, ModelMap};
use crate::prompts::{self, PromptStore, render};
use crate::think::ThinkScheduler;

/// Decisions kept as short-term memory
pub const MEMORY_SIZE: usize = 10;

const FRAME_QUEUE: usize = 1024;
const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// `<ws>?type=player&api-key=<key>&name=<name>`
pub fn player_url(ws_endpoint: &str, api_key: &str, name: &str) -> Result<Url> {
    let mut url = Url::parse(ws_endpoint)
        .with_context(|| format!("invalid WebSocket endpoint: {}", ws_endpoint))?;
    url.query_pairs_mut()
        .append_pair("type", "player")
        .append_pair("api-key", api_key)
        .append_pair("name", name);
    Ok(url)
}

/// Remove a surrounding ```json fence, if any
pub fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse a model answer that should be a JSON object
pub fn parse_decision(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(strip_json_fence(raw))
        .with_context(|| format!("model answer is not JSON: {:?}", raw))?;
    if !value.is_object() {
        bail!("model answer is not a JSON object: {}", value);
    }
    Ok(value)
}

fn pretty(value: Option<&Value>) -> String {
    match value {
        Some(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
        None => "null".to_string(),
    }
}

pub struct WorldAgent {
    name: String,
    api_key: String,
    ws_endpoint: String,
    reconnect_interval: Duration,
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<PromptStore>,
    models: Arc<ModelMap>,
    usage: Arc<UsageTracker>,
    scheduler: ThinkScheduler,
    memory: VecDeque<Value>,
    long_term_memory: String,
    planning: String,
    next_action_id: i64,
}

impl WorldAgent {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            ws_endpoint: DEFAULT_WS_ENDPOINT.to_string(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            provider,
            prompts: Arc::new(PromptStore::new()),
            models: Arc::new(ModelMap::default()),
            usage: Arc::new(UsageTracker::new()),
            scheduler: ThinkScheduler::new(Duration::from_secs(5), Duration::from_secs(60)),
            memory: VecDeque::with_capacity(MEMORY_SIZE),
            long_term_memory: String::new(),
            planning: String::new(),
            next_action_id: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn from_config(config: &Config, name: impl Into<String>) -> Result<Self> {
        let provider = OpenAiCompatProvider::from_config(&config.llm)?;
        Ok(Self::new(name, config.api_key.clone(), Arc::new(provider))
            .with_ws_endpoint(config.ws_endpoint.clone())
            .with_reconnect_interval(config.reconnect_interval())
            .with_models(Arc::new(ModelMap::with_default(config.llm.model.clone())))
            .with_scheduler(ThinkScheduler::from_config(&config.think)))
    }

    pub fn with_ws_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.ws_endpoint = endpoint.into();
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_scheduler(mut self, scheduler: ThinkScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<PromptStore>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_models(mut self, models: Arc<ModelMap>) -> Self {
        self.models = models;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prompts(&self) -> &PromptStore {
        &self.prompts
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn scheduler(&self) -> &ThinkScheduler {
        &self.scheduler
    }

    /// Recent decisions, oldest first
    pub fn memory(&self) -> &VecDeque<Value> {
        &self.memory
    }

    pub fn planning(&self) -> &str {
        &self.planning
    }

    pub fn long_term_memory(&self) -> &str {
        &self.long_term_memory
    }

    /// Fold a frame into the world picture. Returns true at the end of a tick.
    pub fn observe(&mut self, frame: &Value) -> bool {
        self.scheduler.observe(frame)
    }

    async fn ask_json(&self, prompt: String) -> Result<Value> {
        let model = self.models.get(DEFAULT_KEY);
        let messages = [ChatMessage::user(prompt)];
        let response = self
            .provider
            .complete(ChatRequest {
                model: &model,
                messages: &messages,
                tools: &[],
                json_mode: true,
            })
            .await
            .context("model call failed")?;
        self.usage.record(response.usage);
        parse_decision(response.message.text_content().unwrap_or_default())
    }

    /// Ask the model what to do next, given everything observed so far
    pub async fn decide(&self) -> Result<Value> {
        let snapshot = self.scheduler.snapshot();
        let character_info = self.prompts.get(prompts::CHARACTER_INFO);
        let memory = self
            .memory
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        let system_messages = pretty(Some(&Value::Array(self.scheduler.system_messages().to_vec())));
        let other_messages = pretty(Some(&Value::Array(self.scheduler.other_messages().to_vec())));
        let state = pretty(snapshot.state.as_ref());
        let map = pretty(snapshot.nearby_map.as_ref());
        let players = pretty(snapshot.nearby_players.as_ref());
        let assets = pretty(snapshot.assets.as_ref());
        let inventory = pretty(snapshot.inventory.as_ref());
        let available_actions = pretty(snapshot.available_actions.as_ref());

        let prompt = render(
            &self.prompts.get(prompts::WORLD),
            &[
                ("character_name", self.name.as_str()),
                ("character_info", character_info.as_str()),
                ("state", state.as_str()),
                ("map", map.as_str()),
                ("players", players.as_str()),
                ("assets", assets.as_str()),
                ("inventory", inventory.as_str()),
                ("available_actions", available_actions.as_str()),
                ("memory", memory.as_str()),
                ("long_term_memory", self.long_term_memory.as_str()),
                ("planning", self.planning.as_str()),
                ("system_messages", system_messages.as_str()),
                ("messages", other_messages.as_str()),
            ],
        );
        self.ask_json(prompt).await
    }

    /// Update memory and planning from a decision and reset the scheduler
    pub fn absorb(&mut self, decision: &Value, now: Instant) {
        let field = |key: &str| decision.get(key).cloned().unwrap_or_default();
        let (observation, thought, action) = (field("observation"), field("thought"), field("action"));
        info!("Observation: {}", observation);
        info!("Thought: {}", thought);
        info!("Action: {}", action);

        if let Some(planning) = decision.get("planning").and_then(Value::as_str) {
            if !planning.is_empty() {
                self.planning = planning.to_string();
            }
        }
        if let Some(ltm) = decision.get("longTermMemory").and_then(Value::as_str) {
            if !ltm.is_empty() {
                self.long_term_memory = ltm.to_string();
            }
        }

        self.memory.push_back(decision.clone());
        while self.memory.len() > MEMORY_SIZE {
            self.memory.pop_front();
        }
        self.scheduler.after_think(now);
    }

    /// Frames to send for a decision. Each real action gets the next
    /// `actionID`.
    pub fn outgoing(&mut self, decision: &Value) -> Vec<Value> {
        let mut out = Vec::new();
        match decision.get("action") {
            Some(Value::Object(action))
                if !action.is_empty()
                    && action.get("action").and_then(Value::as_str) != Some("no action") =>
            {
                let mut action = action.clone();
                action.insert("actionID".to_string(), json!(self.next_action_id));
                self.next_action_id += 1;
                out.push(Value::Object(action));
            }
            _ => info!("No action to perform."),
        }
        match decision.get("systemMessageReplyAction") {
            Some(Value::Object(reply)) if !reply.is_empty() => out.push(Value::Object(reply.clone())),
            _ => {}
        }
        out
    }

    /// Short first-person story of the recent decisions
    pub async fn summarize(&self) -> Result<String> {
        if self.memory.is_empty() {
            bail!("nothing to summarize yet");
        }
        let stream = pretty(Some(&Value::Array(self.memory.iter().cloned().collect())));
        let character_info = self.prompts.get(prompts::CHARACTER_INFO);
        let prompt = render(
            &self.prompts.get(prompts::STORY),
            &[
                ("character_name", self.name.as_str()),
                ("character_info", character_info.as_str()),
                ("data_stream", stream.as_str()),
            ],
        );
        let answer = self.ask_json(prompt).await?;
        match answer.get("summary").and_then(Value::as_str) {
            Some(summary) if !summary.trim().is_empty() => Ok(summary.to_string()),
            _ => bail!("story answer has no summary: {}", answer),
        }
    }

    pub async fn post_story(&self, api: &ApiClient, image_url: &str) -> Result<Value> {
        let summary = self.summarize().await?;
        info!("Posting story");
        let posted = api
            .post_story(&summary, image_url)
            .await
            .context("failed to post story")?;
        debug!("Story posted: {}", posted);
        Ok(posted)
    }

    /// Play until `shutdown` is cancelled, reconnecting after failures
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let url = player_url(&self.ws_endpoint, &self.api_key, &self.name)?;
        info!("Joining as {}", self.name);

        loop {
            match self.session(&url, &shutdown).await {
                Ok(()) => break,
                Err(e) => warn!("Connection lost: {:#}", e),
            }
            info!("Reconnecting in {}s", self.reconnect_interval.as_secs_f64());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_interval) => {}
            }
        }

        let day = self.usage.stats(Some(24));
        info!(
            "Agent {} stopped ({} input / {} output tokens in the last 24h)",
            self.name, day.input_tokens, day.output_tokens
        );
        Ok(())
    }

    /// One connection. Returns `Ok` only when shut down.
    async fn session(&mut self, url: &Url, shutdown: &CancellationToken) -> Result<()> {
        let (ws, _) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            connected = connect_async(url.as_str()) => {
                connected.context("failed to connect to world server")?
            }
        };
        info!("Connected as {}", self.name);

        let (mut sink, mut stream) = ws.split();
        let (tx, mut frames) = mpsc::channel::<Value>(FRAME_QUEUE);

        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Value>(text.as_str()) {
                        Ok(frame) => {
                            if tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Skipping malformed frame: {}", e),
                    },
                    Ok(Message::Close(reason)) => {
                        info!("Closed by server: {:?}", reason);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        let idle = self.scheduler.max_interval();
        let result = loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                next = tokio::time::timeout(idle, frames.recv()) => next,
            };
            match next {
                Err(_) => self.scheduler.on_idle(),
                Ok(None) => break Err(anyhow!("connection closed")),
                Ok(Some(frame)) => {
                    if !self.observe(&frame) {
                        continue;
                    }
                }
            }

            if !frames.is_empty() || !self.scheduler.should_think(Instant::now()) {
                continue;
            }

            let decided = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                decided = self.decide() => decided,
            };
            let decision = match decided {
                Ok(d) => d,
                Err(e) => {
                    error!("Error generating model response: {:#}", e);
                    continue;
                }
            };
            self.absorb(&decision, Instant::now());

            let mut send_error = None;
            for frame in self.outgoing(&decision) {
                info!("Sending action: {}", frame);
                if let Err(e) = sink.send(Message::Text(frame.to_string().into())).await {
                    send_error = Some(e);
                    break;
                }
            }
            if let Some(e) = send_error {
                break Err(e).context("failed to send action");
            }
        };

        reader.abort();
        let _ = sink.close().await;
        result
    }
}
