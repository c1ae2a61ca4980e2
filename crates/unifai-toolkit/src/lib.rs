//! unifai-toolkit: serve actions to the UnifAI platform
//!
//! A [`Toolkit`] publishes actions that agents call; a [`SmartBuilding`]
//! publishes actions that players inside the world call. Both hold a
//! WebSocket connection open, dispatch each invocation to the registered
//! handler and reconnect when the connection drops.

pub mod events;
pub mod service;
pub mod toolkit;

pub use events::{NoEvents, ServiceEvents, ServiceHandle};
pub use service::{Service, service_url};
pub use toolkit::{SmartBuilding, Toolkit};
