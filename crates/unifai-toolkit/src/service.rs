//! WebSocket serving loop shared by toolkits and smart buildings
//!
//! One connection at a time. On connect the loop sends `registerActions`,
//! fires `on_ready`, then reads frames until the socket drops. Each `action`
//! frame runs on its own task; every outbound frame goes through a single
//! writer task fed by an mpsc channel. After a disconnect the loop waits the
//! reconnect interval and tries again until the shutdown token fires.

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use unifai_core::config::DEFAULT_WS_ENDPOINT;
use unifai_core::{
    Action, ActionRegistry, ClientMessage, ResultSender, ServerMessage, ServiceKind, ServiceState,
};

use crate::events::{NoEvents, ServiceEvents, ServiceHandle};

const OUTBOX_CAPACITY: usize = 256;
const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Build the connection URL: `<ws>?type=<kind>&api-key=<key>[&building-id=<id>]`
pub fn service_url(ws_endpoint: &str, kind: ServiceKind, api_key: &str) -> Result<Url> {
    let mut url = Url::parse(ws_endpoint)
        .with_context(|| format!("invalid WebSocket endpoint: {}", ws_endpoint))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("type", kind.connection_type());
        query.append_pair("api-key", api_key);
        if let ServiceKind::Building { building_id } = kind {
            query.append_pair("building-id", &building_id.to_string());
        }
    }
    Ok(url)
}

/// URL without its query, safe to log
fn display_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// A registry plus the connection settings needed to serve it
pub struct Service {
    api_key: String,
    ws_endpoint: String,
    reconnect_interval: Duration,
    registry: ActionRegistry,
    events: Arc<dyn ServiceEvents>,
    handle: ServiceHandle,
    outbox: mpsc::Receiver<ClientMessage>,
}

impl Service {
    pub fn new(api_key: impl Into<String>, kind: ServiceKind) -> Self {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        Self {
            api_key: api_key.into(),
            ws_endpoint: DEFAULT_WS_ENDPOINT.to_string(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            registry: ActionRegistry::new(),
            events: Arc::new(NoEvents),
            handle: ServiceHandle {
                outbox: tx,
                state: Arc::new(ServiceState::new(kind)),
            },
            outbox: rx,
        }
    }

    pub fn set_ws_endpoint(&mut self, endpoint: impl Into<String>) {
        self.ws_endpoint = endpoint.into();
    }

    pub fn set_reconnect_interval(&mut self, interval: Duration) {
        self.reconnect_interval = interval;
    }

    pub fn set_events(&mut self, events: Arc<dyn ServiceEvents>) {
        self.events = events;
    }

    pub fn register(&mut self, action: Action) {
        self.registry.register(action);
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn kind(&self) -> ServiceKind {
        self.handle.state.kind()
    }

    /// Handle usable from other tasks while the service runs
    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// Only an invalid endpoint is fatal; connection failures are retried.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let url = service_url(&self.ws_endpoint, self.kind(), &self.api_key)?;
        if self.registry.is_empty() {
            warn!("Serving with no registered actions");
        }
        info!(
            "Serving {} action(s) as {} at {}",
            self.registry.len(),
            self.kind().connection_type(),
            display_url(&url)
        );

        let interval = self.reconnect_interval;
        let conn = Arc::new(Connection {
            url,
            registry: self.registry,
            events: self.events,
            handle: self.handle,
            outbox: Arc::new(Mutex::new(self.outbox)),
        });

        loop {
            match conn.clone().serve(&shutdown).await {
                Ok(()) => break,
                Err(e) => warn!("Connection lost: {:#}", e),
            }
            info!("Reconnecting in {}s", interval.as_secs_f64());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Service stopped");
        Ok(())
    }
}

/// Everything one connection attempt needs, shared with dispatch tasks
struct Connection {
    url: Url,
    registry: ActionRegistry,
    events: Arc<dyn ServiceEvents>,
    handle: ServiceHandle,
    outbox: Arc<Mutex<mpsc::Receiver<ClientMessage>>>,
}

impl Connection {
    /// Serve one connection. Returns `Ok` only when shut down.
    async fn serve(self: Arc<Self>, shutdown: &CancellationToken) -> Result<()> {
        let (ws, _) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            connected = connect_async(self.url.as_str()) => {
                connected.with_context(|| format!("failed to connect to {}", display_url(&self.url)))?
            }
        };
        info!("Connected to {}", display_url(&self.url));

        let (mut sink, mut stream) = ws.split();

        let register = ClientMessage::RegisterActions(self.registry.descriptions());
        sink.send(Message::Text(register.to_text().into()))
            .await
            .context("failed to register actions")?;
        debug!("Registered {} action(s)", self.registry.len());

        let conn_token = shutdown.child_token();

        let writer_token = conn_token.clone();
        let outbox = self.outbox.clone();
        let writer = tokio::spawn(async move {
            let mut rx = outbox.lock().await;
            loop {
                tokio::select! {
                    _ = writer_token.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = sink.send(Message::Text(msg.to_text().into())).await {
                            warn!("Failed to send frame: {}", e);
                            writer_token.cancel();
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        let ready = self.clone();
        tokio::spawn(async move {
            if let Err(e) = ready.events.on_ready(&ready.handle).await {
                error!("on_ready failed: {:#}", e);
            }
        });

        let result = loop {
            tokio::select! {
                _ = conn_token.cancelled() => {
                    if shutdown.is_cancelled() {
                        break Ok(());
                    }
                    break Err(anyhow!("writer stopped"));
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.clone().handle_frame(text.as_str()).await,
                    Some(Ok(Message::Close(reason))) => {
                        break Err(anyhow!("closed by server: {:?}", reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e).context("WebSocket read failed"),
                    None => break Err(anyhow!("stream ended")),
                }
            }
        };

        conn_token.cancel();
        let _ = writer.await;
        result
    }

    async fn handle_frame(self: Arc<Self>, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping frame: {}", e);
                return;
            }
        };

        match message {
            ServerMessage::Action(invocation) => {
                debug!(
                    "Received action {} (id {})",
                    invocation.action, invocation.action_id
                );
                let sender = ResultSender::new(&invocation, self.handle.outbox.clone());
                let conn = self.clone();
                tokio::spawn(async move {
                    let state = conn.handle.state.clone();
                    if let Err(e) = conn.registry.dispatch(invocation, state, sender).await {
                        warn!("{:#}", e);
                    }
                });
            }
            ServerMessage::Info(info) => {
                debug!("Received service info");
                self.handle.state.set_info(info.clone()).await;
                self.events.on_info(&info).await;
            }
            ServerMessage::Players(players) => {
                debug!("Received {} player(s)", players.len());
                self.handle.state.set_players(players.clone()).await;
                self.events.on_players(&players).await;
            }
            ServerMessage::Other { kind, .. } => {
                debug!("Ignoring '{}' frame", kind);
            }
        }
    }
}

#[cfg(test)]
impl Service {
    pub(crate) async fn outbox_next(&mut self) -> ClientMessage {
        self.outbox.recv().await.expect("outbox sender is held by the handle")
    }
}
