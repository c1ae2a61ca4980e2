//! WebSocket protocol: JSON frames between the platform and toolkits/buildings
//!
//! Every frame is an object `{"type": ..., "data": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Frame types the platform sends
pub mod server_types {
    pub const ACTION: &str = "action";
    pub const TOOLKIT: &str = "toolkit";
    pub const BUILDING: &str = "building";
    pub const PLAYERS: &str = "players";
}

/// Frame types a toolkit or building sends
pub mod client_types {
    pub const REGISTER_ACTIONS: &str = "registerActions";
    pub const ACTION_RESULT: &str = "actionResult";
    pub const UPDATE_BUILDING: &str = "updateBuilding";
}

/// Raw envelope, before the payload is interpreted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// A remote request to run one action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub action: String,
    #[serde(rename = "actionID")]
    pub action_id: i64,
    /// Set when an agent calls a toolkit
    #[serde(rename = "agentID", default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<i64>,
    /// Set when a player calls a smart building
    #[serde(rename = "playerID", default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<i64>,
    #[serde(rename = "playerName", default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    /// Amount the caller authorized; positive = may charge, negative = wants to be paid
    #[serde(default)]
    pub payment: Option<f64>,
}

/// Who is on the other end of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Agent(i64),
    Player(i64),
    Unknown,
}

impl ActionInvocation {
    pub fn caller(&self) -> Caller {
        match (self.agent_id, self.player_id) {
            (Some(id), _) => Caller::Agent(id),
            (None, Some(id)) => Caller::Player(id),
            (None, None) => Caller::Unknown,
        }
    }
}

/// Interpreted server frame
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Action(ActionInvocation),
    /// Toolkit or building metadata pushed by the platform
    Info(Value),
    Players(Vec<Value>),
    Other { kind: String, data: Value },
}

/// Why a frame was dropped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("non-JSON frame: {0}")]
    NotJson(String),
    #[error("invalid '{kind}' frame: {reason}")]
    BadData { kind: String, reason: String },
}

impl ServerMessage {
    /// Parse one text frame
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| FrameError::NotJson(e.to_string()))?;
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: Frame) -> Result<Self, FrameError> {
        let Frame { kind, data } = frame;
        let bad = |reason: &str| FrameError::BadData {
            kind: kind.clone(),
            reason: reason.to_string(),
        };
        match kind.as_str() {
            server_types::ACTION => {
                if !data.is_object() {
                    return Err(bad("data is not an object"));
                }
                let invocation: ActionInvocation =
                    serde_json::from_value(data).map_err(|e| bad(&e.to_string()))?;
                Ok(Self::Action(invocation))
            }
            server_types::TOOLKIT | server_types::BUILDING => {
                if !data.is_object() {
                    return Err(bad("data is not an object"));
                }
                Ok(Self::Info(data))
            }
            server_types::PLAYERS => match data {
                Value::Array(players) => Ok(Self::Players(players)),
                _ => Err(bad("data is not a list")),
            },
            _ => Ok(Self::Other {
                kind: kind.clone(),
                data,
            }),
        }
    }
}

/// Metadata advertised for one action on connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescription {
    pub description: Value,
    pub payload: Value,
    pub payment: Value,
}

/// Body of `registerActions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterActions {
    pub actions: BTreeMap<String, ActionDescription>,
}

/// Body of `actionResult`; caller ids are echoed from the invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResultData {
    pub action: String,
    #[serde(rename = "actionID")]
    pub action_id: i64,
    #[serde(rename = "agentID", default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<i64>,
    #[serde(rename = "playerID", default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<i64>,
    pub payload: Value,
    pub payment: f64,
}

/// Body of `updateBuilding`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBuilding {
    #[serde(rename = "buildingID")]
    pub building_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Frames a toolkit or building sends to the platform
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    RegisterActions(RegisterActions),
    ActionResult(ActionResultData),
    UpdateBuilding(UpdateBuilding),
}

impl ClientMessage {
    /// Serialize to a text frame. These types always serialize.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            warn!("Failed to serialize outbound frame: {}", e);
            String::new()
        })
    }
}
