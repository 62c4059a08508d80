use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use switchyard_runtime::{ConversationStore, RequestRouter};

use crate::registry::SessionRegistry;
use crate::session;
use crate::types::{HealthResponse, RelaySettings};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<RequestRouter>,
    pub registry: Arc<SessionRegistry>,
    pub settings: Arc<RelaySettings>,
    pub store: Option<Arc<dyn ConversationStore>>,
    /// Cancelled once on shutdown; every session watches it.
    pub shutdown: CancellationToken,
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(router: RequestRouter, settings: RelaySettings) -> Self {
        Self {
            router: Arc::new(router),
            registry: Arc::new(SessionRegistry::new()),
            settings: Arc::new(settings),
            store: None,
            shutdown: CancellationToken::new(),
            allowed_origins: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }
}

/// Create the Axum router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = if state.allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid allowed origin");
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(ws_upgrade))
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve on `listener` until `signal` resolves.
///
/// Shutdown order: cancel every session (each sends close 1001), wait for
/// them to drain, then stop the listener.
pub async fn serve<S>(listener: TcpListener, state: AppState, signal: S) -> anyhow::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state.clone());
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!(addr = %addr, "Relay server listening");

    let shutdown = state.shutdown.clone();
    let registry = state.registry.clone();
    let drain_timeout = state.settings.drain_timeout;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal.await;
            info!(sessions = registry.len(), "Shutdown signal received, closing sessions");
            shutdown.cancel();
            if !registry.wait_drained(drain_timeout).await {
                warn!(
                    remaining = registry.len(),
                    "Sessions still open after drain timeout"
                );
            }
            info!("Sessions closed, stopping listener");
        })
        .await
        .context("Relay server failed")?;

    info!("Relay server stopped");
    Ok(())
}

/// Bind `host:port` and serve until Ctrl+C.
pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    serve(listener, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C, serving until killed");
        std::future::pending::<()>().await;
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.registry.len(),
    })
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, state))
}
