//! Client configuration: optional TOML file, then environment overrides
//!
//! Lookup order for the file is an explicit path, then `~/.unifai/config.toml`.
//! Environment variables always win over file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;

pub const DEFAULT_API_ENDPOINT: &str = "https://backend.unifai.network/api/v1";
pub const DEFAULT_TOOLKIT_API_ENDPOINT: &str = "https://frontend-api.unifai.network/api/v1";
pub const DEFAULT_WS_ENDPOINT: &str = "wss://backend.unifai.network/ws";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Environment variables understood by [`Config::apply_env`]
pub mod env {
    pub const API_KEY: &str = "UNIFAI_API_KEY";
    pub const API_ENDPOINT: &str = "UNIFAI_API_ENDPOINT";
    pub const TOOLKIT_API_ENDPOINT: &str = "UNIFAI_TOOLKIT_API_ENDPOINT";
    pub const WS_ENDPOINT: &str = "UNIFAI_WS_ENDPOINT";
    pub const LLM_API_KEY: &str = "OPENAI_API_KEY";
    pub const LLM_BASE_URL: &str = "OPENAI_BASE_URL";
    pub const MODEL: &str = "UNIFAI_MODEL";
    pub const MODEL_TIMEOUT: &str = "MODEL_TIMEOUT";
    pub const MIN_MODEL_INTERVAL: &str = "MIN_MODEL_INTERVAL";
    pub const MAX_MODEL_INTERVAL: &str = "MAX_MODEL_INTERVAL";
}

/// Top-level client configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: String,
    pub api_endpoint: String,
    pub toolkit_api_endpoint: String,
    pub ws_endpoint: String,
    /// Seconds to wait before reconnecting a dropped WebSocket
    pub reconnect_interval_secs: u64,
    pub llm: LlmConfig,
    pub think: ThinkConfig,
}

/// OpenAI-compatible chat completion settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Polling bounds and field of view for the agent think loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkConfig {
    pub min_model_interval_secs: u64,
    pub max_model_interval_secs: u64,
    /// Grid distance within which buildings are described to the model
    pub vision_range_buildings: u64,
    pub vision_range_players: u64,
    /// Closest buildings always described, however far away
    pub min_num_buildings: usize,
    pub min_num_players: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            toolkit_api_endpoint: DEFAULT_TOOLKIT_API_ENDPOINT.to_string(),
            ws_endpoint: DEFAULT_WS_ENDPOINT.to_string(),
            reconnect_interval_secs: 5,
            llm: LlmConfig::default(),
            think: ThinkConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for ThinkConfig {
    fn default() -> Self {
        Self {
            min_model_interval_secs: 5,
            max_model_interval_secs: 60,
            vision_range_buildings: 16,
            vision_range_players: 16,
            min_num_buildings: 10,
            min_num_players: 10,
        }
    }
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "[REDACTED]" }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &mask(&self.api_key))
            .field("api_endpoint", &self.api_endpoint)
            .field("toolkit_api_endpoint", &self.toolkit_api_endpoint)
            .field("ws_endpoint", &self.ws_endpoint)
            .field("reconnect_interval_secs", &self.reconnect_interval_secs)
            .field("llm", &self.llm)
            .field("think", &self.think)
            .finish()
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &mask(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Default config file location (`~/.unifai/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".unifai").join("config.toml"))
}

impl Config {
    /// Load from file (if any), apply process environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Override fields from an environment lookup function.
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// wipe out a file setting.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get(env::API_KEY) {
            self.api_key = v;
        }
        if let Some(v) = get(env::API_ENDPOINT) {
            self.api_endpoint = v;
        }
        if let Some(v) = get(env::TOOLKIT_API_ENDPOINT) {
            self.toolkit_api_endpoint = v;
        }
        if let Some(v) = get(env::WS_ENDPOINT) {
            self.ws_endpoint = v;
        }
        if let Some(v) = get(env::LLM_API_KEY) {
            self.llm.api_key = v;
        }
        if let Some(v) = get(env::LLM_BASE_URL) {
            self.llm.base_url = v;
        }
        if let Some(v) = get(env::MODEL) {
            self.llm.model = v;
        }
        if let Some(v) = get(env::MODEL_TIMEOUT) {
            self.llm.timeout_secs = parse_secs(env::MODEL_TIMEOUT, &v)?;
        }
        if let Some(v) = get(env::MIN_MODEL_INTERVAL) {
            self.think.min_model_interval_secs = parse_secs(env::MIN_MODEL_INTERVAL, &v)?;
        }
        if let Some(v) = get(env::MAX_MODEL_INTERVAL) {
            self.think.max_model_interval_secs = parse_secs(env::MAX_MODEL_INTERVAL, &v)?;
        }

        debug!("Applied environment overrides");
        Ok(())
    }

    /// Check the invariants the rest of the client relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_api_key(&self.api_key)?;

        for url in [&self.api_endpoint, &self.toolkit_api_endpoint] {
            validate_endpoint(url, &["http", "https"])?;
        }
        validate_endpoint(&self.ws_endpoint, &["ws", "wss"])?;
        validate_endpoint(&self.llm.base_url, &["http", "https"])?;

        if self.think.min_model_interval_secs > self.think.max_model_interval_secs {
            return Err(ConfigError::IntervalOrder {
                min: self.think.min_model_interval_secs,
                max: self.think.max_model_interval_secs,
            });
        }
        if self.reconnect_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "reconnect_interval_secs",
                value: "0".to_string(),
            });
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "llm.timeout_secs",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

/// Reject keys that could never authenticate
pub fn validate_api_key(key: &str) -> Result<(), ConfigError> {
    if key.is_empty() {
        return Err(ConfigError::MissingApiKey);
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::InvalidApiKey("contains whitespace or control characters"));
    }
    Ok(())
}

fn validate_endpoint(raw: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidEndpoint {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(ConfigError::InvalidEndpoint {
            url: raw.to_string(),
            reason: format!("expected scheme {}", schemes.join(" or ")),
        });
    }
    Ok(())
}

fn parse_secs(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
