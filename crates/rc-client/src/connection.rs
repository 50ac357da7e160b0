use crate::error::ClientError;
use crate::state_store::{StateKey, StateStore};
use crate::subscribers::{Subscribers, Subscription};
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);
pub const EVENT_STREAM_PATH: &str = "/ws";
pub const CONNECTION_ID_PARAM: &str = "connectionId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub retry_interval: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Derives the event-stream address from the REST base address.
pub fn derive_socket_url(base: &str, connection_id: Option<&str>) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidServerUrl {
        url: base.to_string(),
        reason,
    };
    let trimmed = base.trim().trim_end_matches('/');
    let mut url = Url::parse(trimmed).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid("cannot switch scheme".to_string()))?;

    let path = format!("{}{EVENT_STREAM_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    if let Some(id) = connection_id.filter(|id| !id.is_empty()) {
        url.query_pairs_mut().append_pair(CONNECTION_ID_PARAM, id);
    }
    Ok(url)
}

/// Reads the identity assignment out of a handshake frame, if it is one.
pub fn identity_assignment(frame: &Value) -> Option<&str> {
    frame
        .get(CONNECTION_ID_PARAM)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

struct Shared {
    store: Arc<dyn StateStore>,
    subscribers: Subscribers,
    identity: watch::Sender<Option<String>>,
    /// True once the server assigned or confirmed the identity on the
    /// current transport. Cleared whenever the transport is not up.
    assigned: watch::Sender<bool>,
    status: watch::Sender<ConnectionStatus>,
    /// Bumped on every connect/disconnect; loops only write state while
    /// their generation is current.
    generation: Mutex<u64>,
    reconnects: AtomicU64,
}

impl Shared {
    fn connection_id(&self) -> Option<String> {
        self.identity.borrow().clone()
    }

    fn generation(&self) -> MutexGuard<'_, u64> {
        self.generation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_generation(&self) -> u64 {
        *self.generation()
    }

    /// Runs `update` only while `generation` is the live one.
    fn if_current(&self, generation: u64, update: impl FnOnce()) -> bool {
        let current = self.generation();
        if *current != generation {
            return false;
        }
        update();
        true
    }

    /// Retires the running loop. Whatever it still reports is dropped.
    fn advance(&self) -> u64 {
        let mut current = self.generation();
        *current += 1;
        self.assigned.send_replace(false);
        self.status.send_replace(ConnectionStatus::Idle);
        *current
    }

    fn set_status(&self, generation: u64, status: ConnectionStatus) {
        self.if_current(generation, || {
            if status != ConnectionStatus::Connected {
                self.assigned.send_replace(false);
            }
            self.status.send_replace(status);
        });
    }

    fn handle_text(&self, generation: u64, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                debug!(event = "ws_non_json_frame", len = text.len());
                return;
            }
        };

        if let Some(id) = identity_assignment(&frame) {
            self.capture_identity(generation, id);
            return;
        }

        self.subscribers.publish(&frame);
    }

    fn capture_identity(&self, generation: u64, id: &str) {
        let applied = self.if_current(generation, || {
            if self.identity.borrow().as_deref() == Some(id) {
                debug!(event = "connection_id_confirmed", connection_id = id);
            } else {
                if let Err(err) = self.store.save(StateKey::ConnectionId, id) {
                    warn!(event = "connection_id_save_error", error = %err);
                }
                self.identity.send_replace(Some(id.to_string()));
                info!(event = "connection_id_assigned", connection_id = id);
            }
            self.assigned.send_replace(true);
        });
        if !applied {
            debug!(event = "connection_id_stale_loop", connection_id = id);
        }
    }
}

/// Long-lived event-stream connection with fixed-interval reconnection and a
/// server-issued identity that survives reconnects.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    options: ConnectionOptions,
    server_url: Option<String>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(store: Arc<dyn StateStore>, options: ConnectionOptions) -> Self {
        let stored = store.load(StateKey::ConnectionId);
        if let Some(id) = &stored {
            info!(event = "connection_id_restored", connection_id = %id);
        }
        let (identity, _) = watch::channel(stored);
        let (assigned, _) = watch::channel(false);
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            shared: Arc::new(Shared {
                store,
                subscribers: Subscribers::new(),
                identity,
                assigned,
                status,
                generation: Mutex::new(0),
                reconnects: AtomicU64::new(0),
            }),
            options,
            server_url: None,
            shutdown: None,
            task: None,
        }
    }

    /// Starts the connection loop for `server_url`, replacing any existing
    /// one. Must be called inside a tokio runtime.
    pub fn connect(&mut self, server_url: &str) -> Result<(), ClientError> {
        derive_socket_url(server_url, None)?;
        self.disconnect();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = self.shared.clone();
        let generation = shared.current_generation();
        let base = server_url.trim().to_string();
        let retry_interval = self.options.retry_interval;
        self.task = Some(tokio::spawn(async move {
            connection_loop(shared, generation, base, retry_interval, shutdown_rx).await;
        }));
        self.shutdown = Some(shutdown_tx);
        self.server_url = Some(server_url.trim().to_string());
        Ok(())
    }

    /// Closes the transport and stops retrying. The identity is kept, but
    /// must be assigned again by the server on the next transport.
    pub fn disconnect(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if self.task.take().is_some() {
            info!(
                event = "ws_disconnect",
                connection_id = ?self.shared.connection_id()
            );
        }
        self.shared.advance();
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(handler)
    }

    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<Value>) {
        self.shared.subscribers.subscribe_channel()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.shared.connection_id()
    }

    pub fn watch_connection_id(&self) -> watch::Receiver<Option<String>> {
        self.shared.identity.subscribe()
    }

    /// The identity, once the server has assigned or confirmed it on the
    /// live transport. A value restored from disk alone does not count.
    pub fn session_id(&self) -> Option<String> {
        if *self.shared.assigned.borrow() {
            self.connection_id()
        } else {
            None
        }
    }

    pub fn is_identity_assigned(&self) -> bool {
        *self.shared.assigned.borrow()
    }

    /// Waits until the server has assigned or confirmed an identity on the
    /// live transport, up to `timeout`.
    pub async fn wait_for_connection_id(&self, timeout: Duration) -> Option<String> {
        let mut rx = self.shared.assigned.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() {
                    if let Some(id) = self.session_id() {
                        return Some(id);
                    }
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    /// Feeds a text frame through the live generation, as if it had arrived
    /// on the socket.
    #[cfg(test)]
    pub(crate) fn receive_text(&self, text: &str) {
        self.shared
            .handle_text(self.shared.current_generation(), text);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn reconnect_count(&self) -> u64 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    pub fn server_url(&self) -> Option<&str> {
        self.server_url.as_deref()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }
}

async fn connection_loop(
    shared: Arc<Shared>,
    generation: u64,
    base: String,
    retry_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let identity = shared.connection_id();
        let url = match derive_socket_url(&base, identity.as_deref()) {
            Ok(url) => url,
            Err(err) => {
                error!(event = "ws_url_error", error = %err);
                break;
            }
        };

        shared.set_status(generation, ConnectionStatus::Connecting);
        let connect = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };
        let (mut ws, _) = match connect {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "ws_connect_error", url = %url, error = %err);
                shared.set_status(generation, ConnectionStatus::Disconnected);
                if wait_for_retry(&mut shutdown, retry_interval).await {
                    break;
                }
                continue;
            }
        };

        shared.set_status(generation, ConnectionStatus::Connected);
        info!(event = "ws_connected", url = %url, resumed = identity.is_some());

        loop {
            tokio::select! {
                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => shared.handle_text(generation, &text),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => shared.handle_text(generation, &text),
                            Err(_) => debug!(event = "ws_non_utf8_frame"),
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(event = "ws_error", error = %err);
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    let _ = ws.close(None).await;
                    shared.set_status(generation, ConnectionStatus::Idle);
                    return;
                }
            }
        }

        shared.reconnects.fetch_add(1, Ordering::Relaxed);
        shared.set_status(generation, ConnectionStatus::Disconnected);
        info!(
            event = "ws_closed",
            connection_id = ?shared.connection_id(),
            retry_ms = retry_interval.as_millis() as u64
        );
        if wait_for_retry(&mut shutdown, retry_interval).await {
            break;
        }
    }
    shared.set_status(generation, ConnectionStatus::Idle);
}

/// Sleeps for the retry interval; true when shutdown was requested instead.
async fn wait_for_retry(shutdown: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}
