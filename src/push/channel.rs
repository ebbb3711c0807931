//! Shared task update channel
//!
//! One WebSocket per session, opened lazily by the first subscriber and
//! reused by every later one. Subscriptions are local routes keyed by event
//! name; dropping a [`Subscription`] removes its route. When the connection
//! ends, for whatever reason, every open subscription's stream ends with it
//! and the next `subscribe` dials again.
//!
//! The connection also watches the session: once the credential it was
//! opened with is replaced or logged out, it closes itself.

use super::frame::{self, Packet};
use crate::error::{AionError, Result};
use crate::session::RequestContext;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

type Sender = mpsc::UnboundedSender<serde_json::Value>;

/// event name -> subscriber id -> sender
#[derive(Default)]
struct Routes {
    table: Mutex<HashMap<String, HashMap<u64, Sender>>>,
}

impl Routes {
    fn add(&self, event: &str, id: u64, tx: Sender) {
        self.table
            .lock()
            .entry(event.to_string())
            .or_default()
            .insert(id, tx);
    }

    fn remove(&self, event: &str, id: u64) {
        let mut table = self.table.lock();
        if let Some(subscribers) = table.get_mut(event) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                table.remove(event);
            }
        }
    }

    fn dispatch(&self, event: &str, payload: serde_json::Value) -> usize {
        let table = self.table.lock();
        match table.get(event) {
            Some(subscribers) => subscribers
                .values()
                .filter(|tx| tx.send(payload.clone()).is_ok())
                .count(),
            None => 0,
        }
    }

    fn clear(&self) {
        self.table.lock().clear();
    }

    fn len(&self) -> usize {
        self.table.lock().values().map(HashMap::len).sum()
    }
}

struct Connection {
    routes: Arc<Routes>,
    shutdown: CancellationToken,
}

impl Connection {
    fn is_live(&self) -> bool {
        !self.shutdown.is_cancelled()
    }
}

/// Live subscription to one event name
pub struct Subscription {
    event: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
    routes: Weak<Routes>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Next payload; `None` once the connection is gone
    pub async fn next(&mut self) -> Option<serde_json::Value> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(routes) = self.routes.upgrade() {
            routes.remove(&self.event, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish()
    }
}

/// Lazily connected Socket.IO listener
pub struct PushChannel {
    endpoint: Url,
    ctx: RequestContext,
    handshake_timeout: Duration,
    connection: Mutex<Option<Connection>>,
    open_lock: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl PushChannel {
    pub fn new(endpoint: Url, ctx: RequestContext, handshake_timeout: Duration) -> Self {
        Self {
            endpoint,
            ctx,
            handshake_timeout,
            connection: Mutex::new(None),
            open_lock: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(Connection::is_live)
    }

    /// Number of active subscriptions on the current connection
    pub fn subscriber_count(&self) -> usize {
        self.connection
            .lock()
            .as_ref()
            .filter(|c| c.is_live())
            .map(|c| c.routes.len())
            .unwrap_or(0)
    }

    /// Listen for `event`, opening the connection if needed
    pub async fn subscribe(&self, event: &str) -> Result<Subscription> {
        let routes = self.ensure_connected().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        routes.add(event, id, tx);
        debug!("Subscribed to {} (#{})", event, id);

        Ok(Subscription {
            event: event.to_string(),
            id,
            rx,
            routes: Arc::downgrade(&routes),
        })
    }

    /// Tear the connection down; subscriptions end, next subscribe reconnects
    pub fn close(&self) {
        if let Some(connection) = self.connection.lock().take() {
            info!("Closing task update channel");
            connection.shutdown.cancel();
            connection.routes.clear();
        }
    }

    async fn ensure_connected(&self) -> Result<Arc<Routes>> {
        let _guard = self.open_lock.lock().await;

        if let Some(connection) = self.connection.lock().as_ref() {
            if connection.is_live() {
                return Ok(connection.routes.clone());
            }
        }

        let connection = self.open().await?;
        let routes = connection.routes.clone();
        *self.connection.lock() = Some(connection);
        Ok(routes)
    }

    async fn open(&self) -> Result<Connection> {
        let grant = self.ctx.grant();
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| AionError::Config(format!("Invalid push URL {}: {}", self.endpoint, e)))?;
        if let Some(credential) = &grant.credential {
            let value = HeaderValue::from_str(&credential.bearer())
                .map_err(|e| AionError::Protocol(format!("Invalid credential header: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        // One deadline covers the upgrade and the namespace connect
        let deadline = Instant::now() + self.handshake_timeout;

        debug!("Connecting task update channel to {}", self.endpoint);
        let (ws, _) = tokio::time::timeout_at(deadline, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| AionError::Network(format!("Timed out connecting to {}", self.endpoint)))?
            .map_err(|e| {
                AionError::Network(format!("Failed to connect to {}: {}", self.endpoint, e))
            })?;

        let routes = Arc::new(Routes::default());
        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let reader = Reader {
            routes: routes.clone(),
            shutdown: shutdown.clone(),
            ctx: self.ctx.clone(),
            epoch: grant.epoch,
            ready: Some(ready_tx),
            heartbeat: None,
        };
        tokio::spawn(reader.run(ws));

        // Stops the reader on every early return, including a dropped caller
        let pending = shutdown.clone().drop_guard();
        match tokio::time::timeout_at(deadline, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                pending.disarm();
                info!("Task update channel connected");
                Ok(Connection { routes, shutdown })
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(AionError::Network(
                "Task update channel closed during handshake".to_string(),
            )),
            Err(_) => Err(AionError::Network(
                "Timed out waiting for task update channel handshake".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for PushChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushChannel")
            .field("endpoint", &self.endpoint.as_str())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.close();
    }
}

struct Reader {
    routes: Arc<Routes>,
    shutdown: CancellationToken,
    ctx: RequestContext,
    epoch: u64,
    ready: Option<oneshot::Sender<Result<()>>>,
    /// Longest silence tolerated: ping interval plus ping timeout
    heartbeat: Option<Duration>,
}

impl Reader {
    async fn run<S>(mut self, mut ws: tokio_tungstenite::WebSocketStream<S>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let mut session_rx = self.ctx.subscribe();
        let mut last_frame = Instant::now();

        loop {
            let deadline = self.heartbeat.and_then(|silence| last_frame.checked_add(silence));
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = ws.close(None).await;
                    break;
                }
                changed = session_rx.changed() => {
                    if changed.is_err() || !self.ctx.is_current(self.epoch) {
                        info!("Session changed, closing task update channel");
                        let _ = ws.close(None).await;
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    warn!("No heartbeat from task update channel, closing");
                    let _ = ws.close(None).await;
                    break;
                }
                message = ws.next() => {
                    last_frame = Instant::now();
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_text(&mut ws, &text).await {
                                let _ = ws.close(None).await;
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Task update channel closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Task update channel error: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown.cancel();
        self.routes.clear();
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(AionError::Network(
                "Task update channel closed before it was ready".to_string(),
            )));
        }
    }

    /// Returns false when the connection should end
    async fn handle_text<S>(
        &mut self,
        ws: &mut tokio_tungstenite::WebSocketStream<S>,
        text: &str,
    ) -> bool
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let packet = match frame::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Ignoring frame: {}", e);
                return true;
            }
        };

        match packet {
            Packet::Open(info) => {
                debug!("Engine open sid={} ping={}ms", info.sid, info.ping_interval);
                let silence = info.ping_interval.saturating_add(info.ping_timeout);
                if silence > 0 {
                    self.heartbeat = Some(Duration::from_millis(silence));
                }
                ws.send(Message::Text(frame::CONNECT.to_string())).await.is_ok()
            }
            Packet::Ping => ws.send(Message::Text(frame::PONG.to_string())).await.is_ok(),
            Packet::Connected => {
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(()));
                }
                true
            }
            Packet::Event { name, payload } => {
                let delivered = self.routes.dispatch(&name, payload);
                debug!("Event {} delivered to {} subscriber(s)", name, delivered);
                true
            }
            Packet::ConnectError(message) => {
                warn!("Task update channel refused connection: {}", message);
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Err(AionError::Protocol(message)));
                }
                false
            }
            Packet::Close | Packet::Disconnected => false,
            Packet::Pong | Packet::Ignored => true,
        }
    }
}
