//! Action registry and dispatch router
//!
//! Actions are registered explicitly before a connection starts serving.
//! Once serving, the registry sits behind an `Arc` and is only read.
//! Every invocation produces exactly one `actionResult` frame: the handler's
//! result, or an error result when the action is unknown, the handler fails
//! or panics, or the requested payment is out of bounds.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::payment;
use crate::protocol::{
    ActionDescription, ActionInvocation, ActionResultData, Caller, ClientMessage, RegisterActions,
};
use crate::service::ServiceState;

/// Outcome of one handler run
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub payload: Value,
    /// Positive charges the caller, negative pays the caller
    pub payment: f64,
}

impl ActionResult {
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            payment: 0.0,
        }
    }

    pub fn with_payment(mut self, payment: f64) -> Self {
        self.payment = payment;
        self
    }

    /// `{"error": message}` with no payment
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::new(serde_json::json!({ "error": message.to_string() }))
    }

    pub fn is_error(&self) -> bool {
        self.payload.get("error").is_some()
    }
}

/// Per-invocation facts handed to a handler
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub action_name: String,
    pub action_id: i64,
    pub caller: Caller,
    pub player_name: Option<String>,
    /// Amount the caller authorized, if any
    pub payment: Option<f64>,
    service: Arc<ServiceState>,
}

impl ActionContext {
    pub fn new(invocation: &ActionInvocation, service: Arc<ServiceState>) -> Self {
        Self {
            action_name: invocation.action.clone(),
            action_id: invocation.action_id,
            caller: invocation.caller(),
            player_name: invocation.player_name.clone(),
            payment: invocation.payment,
            service,
        }
    }

    /// The toolkit or building this invocation arrived at
    pub fn service(&self) -> &ServiceState {
        &self.service
    }

    /// Shorthand for building a result
    pub fn result(&self, payload: impl Into<Value>) -> ActionResult {
        ActionResult::new(payload)
    }
}

/// Sends the single result of one invocation back to the platform.
///
/// `send` consumes the sender, so a result can go out at most once.
#[derive(Debug)]
pub struct ResultSender {
    action: String,
    action_id: i64,
    caller: Caller,
    sink: mpsc::Sender<ClientMessage>,
}

impl ResultSender {
    pub fn new(invocation: &ActionInvocation, sink: mpsc::Sender<ClientMessage>) -> Self {
        Self {
            action: invocation.action.clone(),
            action_id: invocation.action_id,
            caller: invocation.caller(),
            sink,
        }
    }

    fn frame(&self, result: ActionResult) -> ActionResultData {
        let (agent_id, player_id) = match self.caller {
            Caller::Agent(id) => (Some(id), None),
            Caller::Player(id) => (None, Some(id)),
            Caller::Unknown => (None, None),
        };
        ActionResultData {
            action: self.action.clone(),
            action_id: self.action_id,
            agent_id,
            player_id,
            payload: result.payload,
            payment: result.payment,
        }
    }

    pub async fn send(self, result: ActionResult) -> Result<()> {
        let frame = self.frame(result);
        self.sink
            .send(ClientMessage::ActionResult(frame))
            .await
            .map_err(|_| anyhow!("connection closed before result for action {} was sent", self.action_id))
    }
}

/// Code run for an action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: ActionContext, payload: Value) -> Result<ActionResult>;
}

#[async_trait]
impl<F, Fut> ActionHandler for F
where
    F: Fn(ActionContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ActionResult>> + Send + 'static,
{
    async fn handle(&self, ctx: ActionContext, payload: Value) -> Result<ActionResult> {
        (self)(ctx, payload).await
    }
}

/// A named action with its advertised metadata
#[derive(Clone)]
pub struct Action {
    name: String,
    description: Value,
    payload_description: Value,
    payment_description: Value,
    handler: Arc<dyn ActionHandler>,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("payload_description", &self.payload_description)
            .field("payment_description", &self.payment_description)
            .finish()
    }
}

impl Action {
    pub fn new(name: impl Into<String>, handler: impl ActionHandler + 'static) -> Self {
        Self {
            name: name.into(),
            description: Value::String(String::new()),
            payload_description: Value::String(String::new()),
            payment_description: Value::String(String::new()),
            handler: Arc::new(handler),
        }
    }

    /// Human-readable description; text or a JSON object
    pub fn description(mut self, description: impl Into<Value>) -> Self {
        self.description = description.into();
        self
    }

    /// Payload schema description; text or a JSON schema
    pub fn payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload_description = payload.into();
        self
    }

    /// Payment terms, for actions that charge or pay
    pub fn payment(mut self, payment: impl Into<Value>) -> Self {
        self.payment_description = payment.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn describe(&self) -> ActionDescription {
        ActionDescription {
            description: self.description.clone(),
            payload: self.payload_description.clone(),
            payment: self.payment_description.clone(),
        }
    }
}

/// Registry of actions served by one toolkit or building
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<Arc<str>, Action>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action. A second registration under the same name
    /// replaces the first, which is returned.
    pub fn register(&mut self, action: Action) -> Option<Action> {
        let name: Arc<str> = Arc::from(action.name());
        debug!("Registering action: {}", name);
        let previous = self.actions.insert(name.clone(), action);
        if previous.is_some() {
            warn!("Action '{}' was already registered; replacing it", name);
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Sorted action names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }

    /// Body of the `registerActions` frame sent on connect
    pub fn descriptions(&self) -> RegisterActions {
        let actions: BTreeMap<String, ActionDescription> = self
            .actions
            .values()
            .map(|a| (a.name().to_string(), a.describe()))
            .collect();
        RegisterActions { actions }
    }

    /// Run one invocation to completion and return its single result.
    ///
    /// Never fails: every failure mode becomes an error result.
    pub async fn invoke(&self, invocation: &ActionInvocation, service: Arc<ServiceState>) -> ActionResult {
        let Some(action) = self.get(&invocation.action) else {
            warn!("No handler for action '{}'", invocation.action);
            return ActionResult::error(format!("unknown action: {}", invocation.action));
        };

        let ctx = ActionContext::new(invocation, service);
        let payload = normalize_payload(invocation.payload.clone());
        let handler = action.handler.clone();
        let name = invocation.action.clone();

        debug!(
            "Invoking action {} (id {}, caller {:?})",
            name, invocation.action_id, ctx.caller
        );

        // Run on its own task so a panicking handler still yields a result
        let joined = tokio::spawn(async move { handler.handle(ctx, payload).await }).await;

        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Action '{}' failed: {:#}", name, e);
                return ActionResult::error(format!("{:#}", e));
            }
            Err(e) => {
                error!("Action '{}' panicked: {}", name, e);
                return ActionResult::error(format!("action '{}' panicked", name));
            }
        };

        match payment::settle(invocation.payment, result.payment) {
            Ok(_) => result,
            Err(e) => {
                warn!("Action '{}' requested an invalid payment: {}", name, e);
                ActionResult::error(e)
            }
        }
    }

    /// Invoke and send the result through `sender`
    pub async fn dispatch(
        &self,
        invocation: ActionInvocation,
        service: Arc<ServiceState>,
        sender: ResultSender,
    ) -> Result<()> {
        let result = self.invoke(&invocation, service).await;
        if result.is_error() {
            info!(
                "Action {} (id {}) finished with an error result",
                invocation.action, invocation.action_id
            );
        } else {
            debug!(
                "Action {} (id {}) finished, payment {}",
                invocation.action, invocation.action_id, result.payment
            );
        }
        sender.send(result).await
    }
}

/// Absent payloads become `{}`; string payloads holding JSON are decoded
pub fn normalize_payload(payload: Option<Value>) -> Value {
    match payload {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Some(other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceKind;

    fn service() -> Arc<ServiceState> {
        Arc::new(ServiceState::new(ServiceKind::Toolkit))
    }

    fn invocation(action: &str, payload: Value, payment: Option<f64>) -> ActionInvocation {
        ActionInvocation {
            action: action.to_string(),
            action_id: 11,
            agent_id: Some(5),
            player_id: None,
            player_name: None,
            payload: Some(payload),
            payment,
        }
    }

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        async fn handle(&self, ctx: ActionContext, payload: Value) -> Result<ActionResult> {
            let content = payload
                .get("content")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("missing 'content'"))?;
            Ok(ctx.result(format!("{} from {:?}", content, ctx.caller)))
        }
    }

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register(
            Action::new("echo", Echo)
                .description("Echo the message")
                .payload(serde_json::json!({"content": "string"})),
        );
        registry.register(
            Action::new("charge", |ctx: ActionContext, _payload: Value| async move {
                Ok::<_, anyhow::Error>(ActionResult::new("charged").with_payment(ctx.payment.unwrap_or(0.0)))
            })
            .payment("Charges whatever was authorized"),
        );
        registry.register(Action::new("overcharge", |_ctx: ActionContext, _payload: Value| async move {
            Ok::<_, anyhow::Error>(ActionResult::new("greedy").with_payment(100.0))
        }));
        registry.register(Action::new("panic", Panics));
        registry
    }

    struct Panics;

    #[async_trait]
    impl ActionHandler for Panics {
        async fn handle(&self, _ctx: ActionContext, _payload: Value) -> Result<ActionResult> {
            panic!("boom");
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = registry();
        assert_eq!(registry.len(), 4);
        assert!(!registry.is_empty());
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.names(), vec!["charge", "echo", "overcharge", "panic"]);
    }

    #[test]
    fn test_register_replaces_duplicate() {
        let mut registry = ActionRegistry::default();
        assert!(registry.register(Action::new("echo", Echo)).is_none());
        let previous = registry.register(Action::new("echo", Echo).description("v2"));
        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.descriptions().actions["echo"].description,
            Value::String("v2".to_string())
        );
    }

    #[test]
    fn test_descriptions() {
        let desc = registry().descriptions();
        let echo = &desc.actions["echo"];
        assert_eq!(echo.description, "Echo the message");
        assert_eq!(echo.payload["content"], "string");
        assert_eq!(echo.payment, "");
        assert_eq!(desc.actions["charge"].payment, "Charges whatever was authorized");
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let result = registry()
            .invoke(&invocation("echo", serde_json::json!({"content": "hi"}), None), service())
            .await;
        assert_eq!(result.payload, "hi from Agent(5)");
        assert_eq!(result.payment, 0.0);
        assert!(!result.is_error());
    }

    #[tokio::test]
    async fn test_invoke_unknown_action() {
        let result = registry()
            .invoke(&invocation("missing", serde_json::json!({}), None), service())
            .await;
        assert!(result.is_error());
        assert_eq!(result.payload["error"], "unknown action: missing");
        assert_eq!(result.payment, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_action_for_every_unregistered_name() {
        let registry = registry();
        for name in ["", "ECHO", "echo ", "charge2", "unknown"] {
            let result = registry
                .invoke(&invocation(name, serde_json::json!({}), None), service())
                .await;
            let err = result.payload["error"].as_str().unwrap();
            assert!(err.starts_with("unknown action"), "{name}: {err}");
        }
    }

    #[tokio::test]
    async fn test_invoke_handler_error_carries_message() {
        let result = registry()
            .invoke(&invocation("echo", serde_json::json!({}), None), service())
            .await;
        assert_eq!(result.payload["error"], "missing 'content'");
    }

    #[tokio::test]
    async fn test_invoke_handler_panic_becomes_error() {
        let result = registry()
            .invoke(&invocation("panic", serde_json::json!({}), None), service())
            .await;
        assert!(result.payload["error"].as_str().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_invoke_payment_within_authorization() {
        let result = registry()
            .invoke(&invocation("charge", serde_json::json!({}), Some(0.75)), service())
            .await;
        assert_eq!(result.payload, "charged");
        assert_eq!(result.payment, 0.75);
    }

    #[tokio::test]
    async fn test_invoke_negative_payment_pays_caller() {
        let result = registry()
            .invoke(&invocation("charge", serde_json::json!({}), Some(-2.0)), service())
            .await;
        assert_eq!(result.payment, -2.0);
        assert_eq!(payment::direction(result.payment), payment::Direction::Payout);
    }

    #[tokio::test]
    async fn test_invoke_payment_over_authorization_rejected() {
        let result = registry()
            .invoke(&invocation("overcharge", serde_json::json!({}), Some(1.0)), service())
            .await;
        assert!(result.is_error());
        assert_eq!(result.payment, 0.0);
        assert!(result.payload["error"].as_str().unwrap().contains("exceeds"));
    }

    #[tokio::test]
    async fn test_string_payload_is_decoded() {
        let result = registry()
            .invoke(
                &invocation("echo", Value::String(r#"{"content":"json"}"#.to_string()), None),
                service(),
            )
            .await;
        assert_eq!(result.payload, "json from Agent(5)");
    }

    #[test]
    fn test_normalize_payload() {
        assert_eq!(normalize_payload(None), serde_json::json!({}));
        assert_eq!(normalize_payload(Some(Value::Null)), serde_json::json!({}));
        assert_eq!(
            normalize_payload(Some(Value::String("plain text".to_string()))),
            "plain text"
        );
        assert_eq!(normalize_payload(Some(serde_json::json!([1, 2]))), serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_dispatch_sends_exactly_one_result() {
        let registry = registry();
        let (tx, mut rx) = mpsc::channel(8);

        for (name, payload) in [
            ("echo", serde_json::json!({"content": "a"})),
            ("echo", serde_json::json!({})),
            ("missing", serde_json::json!({})),
        ] {
            let inv = invocation(name, payload, None);
            let sender = ResultSender::new(&inv, tx.clone());
            registry.dispatch(inv, service(), sender).await.unwrap();
        }
        drop(tx);

        let mut frames = Vec::new();
        while let Some(msg) = rx.recv().await {
            frames.push(msg);
        }
        assert_eq!(frames.len(), 3);

        let ClientMessage::ActionResult(first) = &frames[0] else {
            panic!("expected actionResult");
        };
        assert_eq!(first.action, "echo");
        assert_eq!(first.action_id, 11);
        assert_eq!(first.agent_id, Some(5));
        assert_eq!(first.player_id, None);
        assert_eq!(first.payload, "a from Agent(5)");
    }

    #[tokio::test]
    async fn test_result_sender_player_caller() {
        let (tx, mut rx) = mpsc::channel(1);
        let inv = ActionInvocation {
            player_id: Some(9),
            agent_id: None,
            ..invocation("echo", serde_json::json!({}), None)
        };
        ResultSender::new(&inv, tx)
            .send(ActionResult::new("ok"))
            .await
            .unwrap();
        let ClientMessage::ActionResult(frame) = rx.recv().await.unwrap() else {
            panic!("expected actionResult");
        };
        assert_eq!(frame.player_id, Some(9));
        assert_eq!(frame.agent_id, None);
    }

    #[tokio::test]
    async fn test_result_sender_closed_connection() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let inv = invocation("echo", serde_json::json!({}), None);
        let err = ResultSender::new(&inv, tx)
            .send(ActionResult::new("late"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection closed"));
    }

    #[tokio::test]
    async fn test_context_sees_service_state() {
        let state = service();
        state.set_players(vec![serde_json::json!({"playerID": 1})]).await;

        let mut registry = ActionRegistry::new();
        registry.register(Action::new("count", |ctx: ActionContext, _payload: Value| async move {
            let n = ctx.service().player_count().await;
            Ok::<_, anyhow::Error>(ActionResult::new(n))
        }));
        let result = registry
            .invoke(&invocation("count", serde_json::json!({}), None), state)
            .await;
        assert_eq!(result.payload, 1);
    }
}
