use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parley_core::gateway::ModelGateway;
use parley_core::ids::ConnectionId;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientRegistry};
use crate::config::{ConfigError, ServerConfig};
use crate::session::{CoordinatorConfig, SessionCoordinator};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub registry: Arc<ClientRegistry>,
    pub config: Arc<ServerConfig>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, gateway: Arc<dyn ModelGateway>) -> Self {
        let coordinator = SessionCoordinator::new(
            gateway,
            CoordinatorConfig {
                history_limit: config.history_limit,
                generation_timeout: config.generation_timeout(),
            },
        );
        let registry = ClientRegistry::new(config.max_send_queue, config.client_timeout());
        Self {
            coordinator: Arc::new(coordinator),
            registry: Arc::new(registry),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Result<Router, ConfigError> {
    let cors = CorsLayer::new()
        .allow_origin(state.config.origin_header()?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Ok(Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

/// Validate the config, bind and start serving. Returns a handle to shut the
/// server down.
pub async fn start(
    config: ServerConfig,
    gateway: Arc<dyn ModelGateway>,
) -> Result<ServerHandle, ServerError> {
    config.validate()?;

    let cleanup_interval = config.heartbeat_interval();
    let addr = config.bind_addr();
    let state = AppState::new(config, gateway);
    let shutdown = state.shutdown.clone();

    let cleanup = client::start_cleanup_task(Arc::clone(&state.registry), cleanup_interval);
    let router = build_router(state.clone())?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        addr = %local_addr,
        model = state.coordinator.gateway().model(),
        origin = %state.config.allowed_origin,
        "parley server started"
    );

    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "server error");
            }
        }
    });

    Ok(ServerHandle {
        local_addr,
        state,
        shutdown,
        server,
        cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Close every connection, stop accepting new ones and wait for the
    /// listener to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.cleanup.abort();
        let _ = self.server.await;
        tracing::info!("parley server stopped");
    }
}

/// WebSocket upgrade handler. Rejects upgrades from foreign browser origins.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN) {
        if origin.as_bytes() != state.config.allowed_origin.as_bytes() {
            tracing::warn!(origin = ?origin, "rejected websocket upgrade from foreign origin");
            return StatusCode::FORBIDDEN.into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Own one connection from upgrade to teardown.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, rx) = state.registry.register();
    state.coordinator.connect(&connection_id);
    tracing::info!(connection_id = %connection_id, "websocket client connected");

    let (inbound_tx, inbound_rx) = mpsc::channel(state.config.max_send_queue);
    let _worker = tokio::spawn(run_chat_worker(
        connection_id.clone(),
        inbound_rx,
        Arc::clone(&state.coordinator),
        Arc::clone(&state.registry),
    ));

    let reason = client::handle_ws_connection(
        socket,
        connection_id.clone(),
        rx,
        Arc::clone(&state.registry),
        inbound_tx,
        state.config.heartbeat_interval(),
        state.shutdown.clone(),
    )
    .await;

    state.coordinator.disconnect(&connection_id, reason.as_str());
    tracing::info!(
        connection_id = %connection_id,
        reason = %reason,
        "websocket client disconnected"
    );
}

/// Process one connection's chat requests in arrival order.
async fn run_chat_worker(
    connection_id: ConnectionId,
    mut inbound: mpsc::Receiver<Option<Value>>,
    coordinator: Arc<SessionCoordinator>,
    registry: Arc<ClientRegistry>,
) {
    while let Some(data) = inbound.recv().await {
        if let Some(event) = coordinator.handle_chat(&connection_id, data).await {
            if !registry.deliver(&connection_id, event.to_json()).await {
                break;
            }
        }
    }
    tracing::debug!(connection_id = %connection_id, "chat worker finished");
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.coordinator.session_count(),
        "connections": state.registry.count(),
        "model": state.coordinator.gateway().model(),
    }))
}
