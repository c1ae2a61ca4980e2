//! Toolkits (called by agents) and smart buildings (called by players)

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use unifai_core::config::{Config, DEFAULT_TOOLKIT_API_ENDPOINT};
use unifai_core::{Action, ActionRegistry, ApiClient, ApiError, ServiceKind, ToolkitFields};

use crate::events::{ServiceEvents, ServiceHandle};
use crate::service::Service;

/// A set of actions published to agents on the platform
pub struct Toolkit {
    service: Service,
    api: ApiClient,
}

impl Toolkit {
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            api: ApiClient::new(api_key.clone(), DEFAULT_TOOLKIT_API_ENDPOINT),
            service: Service::new(api_key, ServiceKind::Toolkit),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut toolkit = Self::new(config.api_key.clone());
        toolkit.api.set_endpoint(config.toolkit_api_endpoint.clone());
        toolkit.service.set_ws_endpoint(config.ws_endpoint.clone());
        toolkit.service.set_reconnect_interval(config.reconnect_interval());
        toolkit
    }

    pub fn with_ws_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.service.set_ws_endpoint(endpoint);
        self
    }

    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api.set_endpoint(endpoint);
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.service.set_reconnect_interval(interval);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn ServiceEvents>) -> Self {
        self.service.set_events(events);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.service.register(action);
        self
    }

    pub fn register(&mut self, action: Action) {
        self.service.register(action);
    }

    pub fn registry(&self) -> &ActionRegistry {
        self.service.registry()
    }

    pub fn handle(&self) -> ServiceHandle {
        self.service.handle()
    }

    /// Change the toolkit's name and/or description on the platform
    pub async fn update_toolkit(
        &self,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Value, ApiError> {
        info!("Updating toolkit fields");
        self.api
            .update_toolkit(&ToolkitFields { name, description })
            .await
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.service.run(shutdown).await
    }
}

/// A building inside the world whose actions players can call
pub struct SmartBuilding {
    service: Service,
    building_id: i64,
}

impl SmartBuilding {
    pub fn new(api_key: impl Into<String>, building_id: i64) -> Self {
        Self {
            service: Service::new(api_key, ServiceKind::Building { building_id }),
            building_id,
        }
    }

    pub fn from_config(config: &Config, building_id: i64) -> Self {
        let mut building = Self::new(config.api_key.clone(), building_id);
        building.service.set_ws_endpoint(config.ws_endpoint.clone());
        building
            .service
            .set_reconnect_interval(config.reconnect_interval());
        building
    }

    pub fn building_id(&self) -> i64 {
        self.building_id
    }

    pub fn with_ws_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.service.set_ws_endpoint(endpoint);
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.service.set_reconnect_interval(interval);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn ServiceEvents>) -> Self {
        self.service.set_events(events);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.service.register(action);
        self
    }

    pub fn register(&mut self, action: Action) {
        self.service.register(action);
    }

    pub fn registry(&self) -> &ActionRegistry {
        self.service.registry()
    }

    /// Handle for `update_building` and for reading the cached building info
    /// and players
    pub fn handle(&self) -> ServiceHandle {
        self.service.handle()
    }

    /// Queue an `updateBuilding` frame; sent once connected
    pub async fn update_building(
        &self,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<()> {
        self.service.handle().update_building(name, description).await
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.service.run(shutdown).await
    }
}
