use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parley_core::errors::ChatError;
use parley_core::ids::ConnectionId;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ClientEvent, ServerEvent};

/// Why a connection ended. Logged with the session teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The browser sent a close frame or ended the stream.
    ClientClosed,
    /// Reading from the socket failed.
    TransportError,
    /// Writing failed, or the client was dropped from the registry.
    WriterClosed,
    ServerShutdown,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::WriterClosed => "writer_closed",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected WebSocket client.
pub struct Client {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
    timeout: Duration,
}

impl Client {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>, timeout: Duration) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
            timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < self.timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
///
/// The registry holds the only sender for each client's outbound queue, so
/// unregistering a client closes its writer.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Arc<Client>>,
    max_send_queue: usize,
    client_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize, client_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            client_timeout,
        }
    }

    /// Register a new client and return its id and outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(Client::new(id.clone(), tx, self.client_timeout));
        self.clients.insert(id.clone(), client);
        (id, rx)
    }

    pub fn unregister(&self, id: &ConnectionId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Queue a frame for one client, waiting for room in its queue. Returns
    /// `false` once the client is gone.
    pub async fn deliver(&self, id: &ConnectionId, message: String) -> bool {
        let Some(tx) = self.get(id).map(|client| client.tx.clone()) else {
            return false;
        };
        tx.send(message).await.is_ok()
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Remove clients that haven't answered a ping within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(connection_id = %id, "cleaned up dead client");
        }
        dead.len()
    }
}

/// Drive one WebSocket: a writer forwarding the outbound queue plus pings,
/// and a reader forwarding chat payloads to `inbound`.
///
/// Returns once either side stops. The reader never waits on a chat
/// request; a payload that doesn't fit the inbound queue is answered with an
/// error event instead.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection_id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    inbound: mpsc::Sender<Option<Value>>,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
) -> DisconnectReason {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = connection_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
        DisconnectReason::WriterClosed
    });

    let reader_cid = connection_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(connection_id = %reader_cid, error = %e, "socket read failed");
                    return DisconnectReason::TransportError;
                }
            };
            match msg {
                WsMessage::Text(text) => {
                    let event = ClientEvent::parse(text.as_str());
                    if !event.is_chat() {
                        tracing::debug!(
                            connection_id = %reader_cid,
                            event = %event.event,
                            "ignoring unknown event"
                        );
                        continue;
                    }
                    if let Err(mpsc::error::TrySendError::Full(_)) = inbound.try_send(event.data) {
                        let e = ChatError::Backlogged;
                        tracing::warn!(
                            connection_id = %reader_cid,
                            error_kind = e.kind(),
                            "chat queue full, rejecting request"
                        );
                        let reply = ServerEvent::Error(e.client_message().to_owned());
                        reader_registry.deliver(&reader_cid, reply.to_json()).await;
                    }
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => return DisconnectReason::ClientClosed,
                _ => {}
            }
        }
        DisconnectReason::ClientClosed
    });

    let writer_abort = writer.abort_handle();
    let reader_abort = reader.abort_handle();

    let reason = tokio::select! {
        r = writer => r.unwrap_or(DisconnectReason::WriterClosed),
        r = reader => r.unwrap_or(DisconnectReason::TransportError),
        _ = shutdown.cancelled() => DisconnectReason::ServerShutdown,
    };
    writer_abort.abort();
    reader_abort.abort();

    registry.unregister(&connection_id);
    reason
}

/// Start a background task that periodically drops dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "dead client cleanup");
            }
        }
    })
}
