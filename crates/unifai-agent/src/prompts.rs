//! Prompt store: built-in defaults plus runtime overrides
//!
//! Keys are dotted, `<group>.<name>` (e.g. `agent.history`). Overrides take
//! effect immediately, even while an agent is running. An empty override
//! falls back to the default.

use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::sync::{LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

pub const HISTORY: &str = "agent.history";
pub const SYSTEM: &str = "agent.system";
pub const WORLD: &str = "agent.agent";
pub const CHARACTER_INFO: &str = "character.info";
pub const STORY: &str = "summarize.story";

const HISTORY_PROMPT: &str = "\
You decide whether answering a user's message requires the earlier conversation.
Reply with a single integer from 0 to 100 and nothing else.
0 means the message is fully self-contained. 100 means it cannot be understood without the previous messages.

Examples:
User: What is the weather in Paris?
0
User: What is the price of bitcoin?
0
User: Can you show more?
100
User: What about the second one?
100
User: Translate that into Spanish.
100";

const SYSTEM_PROMPT: &str = "\
You are a helpful assistant with access to a large catalogue of services.
When a request needs live data or an external capability, use search_services to find a suitable service, then call it with invoke_service.
Only use actions returned by search_services. Keep answers concise and say so plainly when no service can help.";

const WORLD_PROMPT: &str = "\
You are {character_name}, a resident of a shared virtual world.

About you:
{character_info}

Your current state:
{state}

Buildings near you:
{map}

Players near you:
{players}

Your assets:
{assets}

Your inventory:
{inventory}

Actions you can take right now:
{available_actions}

Your recent observations, thoughts and actions:
{memory}

Your long term memory:
{long_term_memory}

Your current plan:
{planning}

System messages:
{system_messages}

Other messages:
{messages}

Respond with a JSON object with the fields \"observation\", \"thought\", \"action\" (one of the available actions as an object, or {\"action\": \"no action\"}), and optionally \"longTermMemory\" and \"planning\".";

const CHARACTER_INFO_PROMPT: &str = "A curious newcomer who likes meeting people and exploring buildings.";

const STORY_PROMPT: &str = "\
You are {character_name}. {character_info}
Here is what you observed, thought and did recently:
{data_stream}
Write a short first-person story about it. Respond with a JSON object {\"summary\": \"...\"}.";

fn defaults() -> &'static [(&'static str, &'static str)] {
    &[
        (HISTORY, HISTORY_PROMPT),
        (SYSTEM, SYSTEM_PROMPT),
        (WORLD, WORLD_PROMPT),
        (CHARACTER_INFO, CHARACTER_INFO_PROMPT),
        (STORY, STORY_PROMPT),
    ]
}

/// Built-in prompt for `key`
pub fn default_prompt(key: &str) -> Option<&'static str> {
    defaults().iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Prompts with per-key overrides
#[derive(Debug, Default)]
pub struct PromptStore {
    overrides: RwLock<HashMap<String, String>>,
}

impl PromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is one map operation, so a poisoned map is still whole
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.overrides.read().unwrap_or_else(|poisoned| {
            warn!("Prompt store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.overrides.write().unwrap_or_else(|poisoned| {
            warn!("Prompt store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Override if set and non-empty, otherwise the default, otherwise `""`
    pub fn get(&self, key: &str) -> String {
        if let Some(p) = self.read().get(key).filter(|p| !p.is_empty()) {
            return p.clone();
        }
        match default_prompt(key) {
            Some(p) => p.to_string(),
            None => {
                warn!("No prompt for key '{}'", key);
                String::new()
            }
        }
    }

    /// Override one prompt; an empty string restores the default
    pub fn set(&self, key: impl Into<String>, prompt: impl Into<String>) {
        self.write().insert(key.into(), prompt.into());
    }

    /// Replace every override
    pub fn set_prompts(&self, prompts: HashMap<String, String>) {
        *self.write() = prompts;
    }

    /// Merge overrides into the current ones
    pub fn update_prompts(&self, prompts: HashMap<String, String>) {
        self.write().extend(prompts);
    }

    /// Defaults merged with overrides, as a caller would see them
    pub fn get_all(&self) -> BTreeMap<String, String> {
        let mut all: BTreeMap<String, String> = defaults()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for (k, v) in self.read().iter() {
            all.insert(k.clone(), v.clone());
        }
        all
    }
}

/// Replace `{name}` placeholders in a single pass. Unknown placeholders and
/// literal braces are left untouched, and inserted values are never expanded.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            values
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
