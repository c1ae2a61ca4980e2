//! Lifecycle hooks for a served toolkit or building

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use unifai_core::protocol::UpdateBuilding;
use unifai_core::{ClientMessage, ServiceKind, ServiceState};

/// Handle for talking to the platform from outside a handler.
///
/// Frames queue up while disconnected and go out after the next connect.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub(crate) outbox: mpsc::Sender<ClientMessage>,
    pub(crate) state: Arc<ServiceState>,
}

impl ServiceHandle {
    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    /// Rename or re-describe the building. Toolkits use
    /// [`crate::Toolkit::update_toolkit`] instead.
    pub async fn update_building(
        &self,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<()> {
        let ServiceKind::Building { building_id } = self.state.kind() else {
            bail!("update_building called on a toolkit connection");
        };
        debug!("Queueing updateBuilding for building {}", building_id);
        self.outbox
            .send(ClientMessage::UpdateBuilding(UpdateBuilding {
                building_id,
                name,
                description,
            }))
            .await
            .map_err(|_| anyhow::anyhow!("service has stopped"))
    }
}

/// Callbacks fired by the serving loop. All methods default to no-ops.
#[async_trait]
pub trait ServiceEvents: Send + Sync {
    /// Fired after every successful connect, once actions are registered
    async fn on_ready(&self, _handle: &ServiceHandle) -> Result<()> {
        Ok(())
    }

    /// Toolkit or building info pushed by the platform
    async fn on_info(&self, _info: &Value) {}

    /// Current players inside a building
    async fn on_players(&self, _players: &[Value]) {}
}

/// Events implementation that ignores everything
pub struct NoEvents;

impl ServiceEvents for NoEvents {}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(kind: ServiceKind) -> (ServiceHandle, mpsc::Receiver<ClientMessage>) {
        let (tx, rx) = mpsc::channel(4);
        (
            ServiceHandle {
                outbox: tx,
                state: Arc::new(ServiceState::new(kind)),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_update_building_queues_frame() {
        let (handle, mut rx) = handle(ServiceKind::Building { building_id: 8 });
        handle
            .update_building(Some("Library".to_string()), None)
            .await
            .unwrap();
        let ClientMessage::UpdateBuilding(frame) = rx.recv().await.unwrap() else {
            panic!("expected updateBuilding");
        };
        assert_eq!(frame.building_id, 8);
        assert_eq!(frame.name.as_deref(), Some("Library"));
    }

    #[tokio::test]
    async fn test_update_building_rejected_for_toolkit() {
        let (handle, _rx) = handle(ServiceKind::Toolkit);
        assert!(handle.update_building(None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_no_events_defaults() {
        let (handle, _rx) = handle(ServiceKind::Toolkit);
        assert!(NoEvents.on_ready(&handle).await.is_ok());
        NoEvents.on_info(&serde_json::json!({})).await;
        NoEvents.on_players(&[]).await;
    }
}
