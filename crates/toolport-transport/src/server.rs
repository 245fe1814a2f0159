//! HTTP duplex transport using Axum.
//!
//! Routes:
//! - `GET /ping` — liveness probe
//! - `POST /notify-tools-updated` — relay reports a changed tool list
//! - `POST /` — one JSON-RPC envelope per request

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use toolport_protocol::{Methods, RpcMessage};
use toolport_registry::{DEFAULT_PORT, RegistryStore};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::gate::{VersionGate, VersionGateConfig};
use crate::notice::{LogNotifier, OperatorNotice, OperatorNotifier};
use crate::pending::{Delivery, Outbound};

/// Header carrying the relay's package version.
pub const RELAY_VERSION_HEADER: &str = "x-relay-version";

/// Receives every inbound envelope.
///
/// Implementations must not block: process the message on a task of your
/// own and reply through the [`Outbound`] handle obtained from the
/// transport. Requests stay open until that reply arrives.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, message: RpcMessage);
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Project this instance serves; its router entry is removed on close
    pub workspace: Option<String>,
    /// Router table holding this instance's entry
    pub registry: Option<RegistryStore>,
    /// Caller-version gate settings
    pub version_gate: VersionGateConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            hostname: "127.0.0.1".into(),
            workspace: None,
            registry: None,
            version_gate: VersionGateConfig::default(),
        }
    }
}

/// State shared between the transport handle and request handlers.
struct Shared {
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    outbound: Outbound,
    gate: VersionGate,
    notifier: Arc<dyn OperatorNotifier>,
}

/// A bound HTTP endpoint for one instance.
pub struct DuplexTransport {
    shared: Arc<Shared>,
    config: TransportConfig,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
}

impl DuplexTransport {
    /// Bind and start serving with the log-only notifier.
    pub async fn start(config: TransportConfig) -> Result<Self, TransportError> {
        Self::start_with_notifier(config, Arc::new(LogNotifier)).await
    }

    /// Bind and start serving. Fails if the port is already in use.
    pub async fn start_with_notifier(
        config: TransportConfig,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Result<Self, TransportError> {
        let shared = Arc::new(Shared {
            handler: RwLock::new(None),
            outbound: Outbound::new(),
            gate: VersionGate::new(config.version_gate.clone()),
            notifier,
        });

        let app = Router::new()
            .route("/", post(message_handler))
            .route("/ping", get(ping_handler))
            .route("/notify-tools-updated", post(tools_updated_handler))
            .with_state(shared.clone());

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port)
            .parse()
            .map_err(|_| TransportError::InvalidAddress(format!("{}:{}", config.hostname, config.port)))?;

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|source| {
            warn!("Failed to listen on port {}: {source}", config.port);
            TransportError::Bind { port: config.port, source }
        })?;
        let actual_port = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { port: config.port, source })?
            .port();

        info!("Toolport transport listening on http://{}:{}", config.hostname, actual_port);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shared,
            config,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    /// Install the handler that receives inbound envelopes.
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.shared.handler.write() = Some(handler);
    }

    /// Handle for replying to held requests.
    pub fn outbound(&self) -> Outbound {
        self.shared.outbound.clone()
    }

    /// Deliver a handler reply. Unmatched replies are dropped.
    pub fn send(&self, message: RpcMessage) -> Delivery {
        self.shared.outbound.send(message)
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting connections, release the port, and remove this
    /// instance's router entry. Cleanup failures are logged only.
    pub async fn close(&mut self) {
        // Held requests would otherwise keep graceful shutdown waiting.
        self.shared.outbound.cancel_all();

        if let Some(tx) = self.shutdown_tx.take() {
            info!("Closing server on port {}", self.port);
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }

        if let (Some(workspace), Some(store)) = (&self.config.workspace, &self.config.registry) {
            match store.unregister_owned(workspace, self.port).await {
                Ok(0) => debug!("Router entry for {workspace} is owned by another instance; leaving it"),
                Ok(_) => info!("Unregistered workspace {workspace} from router table"),
                Err(e) => warn!("Failed to unregister workspace {workspace}: {e}"),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ping_handler() -> impl IntoResponse {
    debug!("Received ping request");
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}

async fn tools_updated_handler(State(shared): State<Arc<Shared>>) -> impl IntoResponse {
    info!("Received tools updated notification");
    shared.notifier.notify(OperatorNotice::ToolsUpdated);
    Json(json!({ "success": true }))
}

async fn message_handler(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Error handling message: {e}");
            return internal_error("Internal Server Error");
        }
    };
    debug!("Received message: {value}");

    let message = match RpcMessage::from_value(value) {
        Ok(m) => m,
        Err(e) => {
            warn!("Error handling message: {e}");
            return internal_error("Internal Server Error");
        }
    };

    if message.method() == Some(Methods::TOOLS_CALL) {
        let caller = headers
            .get(RELAY_VERSION_HEADER)
            .and_then(|v| v.to_str().ok());
        shared.gate.inspect(caller, shared.notifier.as_ref());
    }

    let handler = { shared.handler.read().clone() };
    let Some(handler) = handler else {
        return internal_error("No message handler");
    };

    match message.id().cloned() {
        Some(id) => {
            let response = shared.outbound.register(id.clone());
            handler.on_message(message);
            match response.await {
                Ok(reply) => Json(reply).into_response(),
                Err(_) => {
                    warn!("Pending call {id} was released without a reply");
                    internal_error("Internal Server Error")
                }
            }
        }
        None => {
            handler.on_message(message);
            Json(json!({ "success": true })).into_response()
        }
    }
}

fn internal_error(body: &'static str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
}
