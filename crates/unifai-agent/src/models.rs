//! Per-prompt model selection

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use unifai_core::config::DEFAULT_MODEL;

pub const DEFAULT_KEY: &str = "default";
pub const HISTORY_KEY: &str = "history";

/// Maps prompt keys to model names; `default` backs every unmapped key
#[derive(Debug)]
pub struct ModelMap {
    models: RwLock<HashMap<String, String>>,
}

impl Default for ModelMap {
    fn default() -> Self {
        Self::with_default(DEFAULT_MODEL)
    }
}

impl ModelMap {
    pub fn with_default(model: impl Into<String>) -> Self {
        Self {
            models: RwLock::new(HashMap::from([(DEFAULT_KEY.to_string(), model.into())])),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.models.read().unwrap_or_else(|poisoned| {
            warn!("Model map lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.models.write().unwrap_or_else(|poisoned| {
            warn!("Model map lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, key: &str) -> String {
        let models = self.read();
        models
            .get(key)
            .or_else(|| models.get(DEFAULT_KEY))
            .cloned()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn set(&self, key: impl Into<String>, model: impl Into<String>) {
        self.write().insert(key.into(), model.into());
    }

    /// Replace the whole map
    pub fn set_models(&self, map: HashMap<String, String>) {
        *self.write() = map;
    }

    pub fn update_models(&self, map: HashMap<String, String>) {
        self.write().extend(map);
    }
}
