//! Live view of the toolkit or building a registry is serving

use serde_json::Value;
use tokio::sync::RwLock;

/// What kind of service the connection represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Toolkit,
    Building { building_id: i64 },
}

impl ServiceKind {
    /// Value of the `type` query parameter on the WebSocket URL
    pub fn connection_type(&self) -> &'static str {
        match self {
            Self::Toolkit => "toolkit",
            Self::Building { .. } => "building",
        }
    }
}

/// Latest info and player list pushed by the platform.
///
/// Shared by every [`crate::ActionContext`] of one connection.
#[derive(Debug)]
pub struct ServiceState {
    kind: ServiceKind,
    info: RwLock<Value>,
    players: RwLock<Vec<Value>>,
}

impl ServiceState {
    pub fn new(kind: ServiceKind) -> Self {
        Self {
            kind,
            info: RwLock::new(Value::Object(Default::default())),
            players: RwLock::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub async fn info(&self) -> Value {
        self.info.read().await.clone()
    }

    pub async fn set_info(&self, info: Value) {
        *self.info.write().await = info;
    }

    pub async fn players(&self) -> Vec<Value> {
        self.players.read().await.clone()
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn set_players(&self, players: Vec<Value>) {
        *self.players.write().await = players;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_type() {
        assert_eq!(ServiceKind::Toolkit.connection_type(), "toolkit");
        assert_eq!(
            ServiceKind::Building { building_id: 3 }.connection_type(),
            "building"
        );
    }

    #[tokio::test]
    async fn test_state_updates() {
        let state = ServiceState::new(ServiceKind::Toolkit);
        assert!(state.info().await.as_object().unwrap().is_empty());
        assert_eq!(state.player_count().await, 0);

        state.set_info(serde_json::json!({"name": "Bank"})).await;
        state
            .set_players(vec![serde_json::json!({"playerID": 1}), serde_json::json!({"playerID": 2})])
            .await;

        assert_eq!(state.info().await["name"], "Bank");
        assert_eq!(state.player_count().await, 2);
        assert_eq!(state.players().await[1]["playerID"], 2);
    }
}
