//! unifai-core: shared building blocks for UnifAI clients
//!
//! Configuration, the authenticated HTTP API client, the WebSocket frame
//! types, payment settlement and the action registry that toolkits and smart
//! buildings serve from.

pub mod action;
pub mod api;
pub mod config;
pub mod error;
pub mod payment;
pub mod protocol;
pub mod service;

pub use action::{Action, ActionContext, ActionHandler, ActionRegistry, ActionResult, ResultSender};
pub use api::{ApiClient, ToolkitFields};
pub use config::Config;
pub use error::{ApiError, ConfigError};
pub use protocol::{ActionInvocation, Caller, ClientMessage, ServerMessage};
pub use service::{ServiceKind, ServiceState};
