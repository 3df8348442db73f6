//! `PulseServer` — Axum HTTP surface and process lifecycle.
//!
//! Routes:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /` | Dashboard page, or the WebSocket handshake when the request carries an upgrade |
//! | `GET /sse` | Push-transport stream |
//! | `GET /api/stats` | Stats aggregator snapshot |
//! | `POST /api/broadcast` | Operator broadcast to one or both transports |
//! | `GET /health` | Liveness probe |
//! | `GET /metrics` | Prometheus text |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use pulse_core::{BroadcastTarget, ReadingGenerator};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::broadcaster::Broadcaster;
use crate::config::ServerConfig;
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::websocket;

/// The dashboard page, served from the root path.
const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");

/// Errors from server startup.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The requested address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The configured loss probability is out of range.
    #[error(transparent)]
    Generator(#[from] pulse_core::GeneratorError),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Fan-out driver and both registries.
    pub broadcaster: Arc<Broadcaster>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Stats aggregator anchored at process start.
    pub stats: Arc<StatsAggregator>,
    /// Renders the `/metrics` endpoint.
    pub metrics: PrometheusHandle,
    /// Cancelled on shutdown; long-lived connections watch it so the
    /// listener can drain promptly.
    pub cancel: CancellationToken,
}

/// The main Pulse server.
pub struct PulseServer {
    config: Arc<ServerConfig>,
    broadcaster: Arc<Broadcaster>,
    stats: Arc<StatsAggregator>,
    metrics: PrometheusHandle,
    cancel: CancellationToken,
}

impl PulseServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        Self {
            config: Arc::new(config),
            broadcaster: Arc::new(Broadcaster::new()),
            stats: Arc::new(StatsAggregator::new()),
            metrics,
            cancel: CancellationToken::new(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broadcaster: self.broadcaster.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
            metrics: self.metrics.clone(),
            cancel: self.cancel.clone(),
        };

        Router::new()
            .route("/", get(root_handler))
            .route("/sse", get(crate::sse::sse_handler))
            .route("/api/stats", get(stats_handler))
            .route("/api/broadcast", post(broadcast_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the listener, start the generator loop, and serve.
    ///
    /// Returns the bound address (useful with port `0`) and the join
    /// handle of the serving task. The task exits after
    /// [`PulseServer::shutdown`], draining the generator loop first.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr,
            source,
        })?;

        let generator = ReadingGenerator::new(self.config.loss_probability)?;
        let generator_task = tokio::spawn(self.broadcaster.clone().run(
            generator,
            self.config.tick_interval(),
            self.cancel.clone(),
        ));

        let app = self.router();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let shutdown = cancel.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(error) = result {
                error!(%error, "server task failed");
            }
            let _ = generator_task.await;
            info!("server task stopped");
        });

        Ok((local_addr, handle))
    }

    /// Initiate shutdown: stops the generator loop and the listener.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Get the broadcaster.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// `POST /api/broadcast` request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastRequest {
    /// Operator-supplied text.
    pub message: String,
    /// Which transport(s) to deliver to.
    pub protocol: BroadcastTarget,
}

/// `POST /api/broadcast` response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastResponse {
    /// Fixed acknowledgement string.
    pub status: String,
    /// Echo of the requested target.
    pub protocol: BroadcastTarget,
}

/// `GET /health` response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Currently connected clients, both transports.
    pub connections: usize,
}

/// `GET /` — the dashboard, or the WebSocket handshake.
///
/// The socket transport lives at the root path, sharing it with the page:
/// requests carrying a valid upgrade header are switched to a WebSocket,
/// everything else gets the dashboard HTML.
async fn root_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
) -> Response {
    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| websocket::handle_socket(socket, state)),
        Err(_) => Html(DASHBOARD_HTML).into_response(),
    }
}

/// `GET /api/stats`
async fn stats_handler(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot(&state.broadcaster))
}

/// `POST /api/broadcast`
async fn broadcast_handler(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Json<BroadcastResponse> {
    state
        .broadcaster
        .broadcast(&request.message, request.protocol);
    Json(BroadcastResponse {
        status: "Message broadcasted".into(),
        protocol: request.protocol,
    })
}

/// `GET /health`
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: state.stats.uptime().as_secs(),
        connections: state.broadcaster.sse().len() + state.broadcaster.websocket().len(),
    })
}

/// `GET /metrics`
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}
