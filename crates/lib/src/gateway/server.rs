//! Gateway HTTP + WebSocket server (single port).

use crate::config::Config;
use crate::session::{Session, SessionSettings};
use crate::transport;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, Request, State,
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub settings: SessionSettings,
}

impl GatewayState {
    pub fn new(config: Config) -> Self {
        let settings = config.bridge.session_settings();
        Self {
            config: Arc::new(config),
            settings,
        }
    }
}

/// Routes: `GET /` health, `GET /ws` bridge. Every request is access-logged.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

/// Bind to the configured address and serve until SIGINT or SIGTERM.
pub async fn run_gateway(config: Config) -> Result<()> {
    config.bridge.validate()?;
    let bind_addr = format!("{}:{}", config.bridge.bind.trim(), config.bridge.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!(
        "gateway listening on {}, relaying to {}",
        bind_addr,
        config.bridge.backend
    );

    let app = router(GatewayState::new(config));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should stop accepting connections.
/// Upgraded sessions are detached from the server and end with their transports.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, no longer accepting connections");
}

/// One line per request: remote, request line, status, latency.
async fn access_log(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();
    let response = next.run(req).await;
    log::info!(
        "{} \"{} {} {:?}\" {} {:?}",
        remote,
        method,
        uri,
        version,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "backend": state.config.bridge.backend,
        "port": state.config.bridge.port,
    }))
}

/// GET /ws dials the backend, then upgrades and hands both transports to a new session.
/// Dialing first lets a dead backend surface as a 500 instead of an immediately closed socket.
async fn ws_handler(
    State(state): State<GatewayState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => {
            log::debug!("websocket upgrade rejected: {}", e);
            return (StatusCode::BAD_REQUEST, "unable to upgrade to websockets").into_response();
        }
    };

    let settings = state.settings;
    let backend = state.config.bridge.backend.as_str();
    let dialed = match Session::dial(backend, settings).await {
        Ok(dialed) => dialed,
        Err(e) => {
            log::warn!("unable to create new proxy: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "unable to create new proxy")
                .into_response();
        }
    };

    ws.max_message_size(settings.read_limit)
        .on_failed_upgrade(|e| log::warn!("websocket upgrade failed: {}", e))
        .on_upgrade(move |socket| async move {
            let (source, sink) = transport::split_websocket(socket);
            let session = dialed.attach(source, sink);
            log::debug!("session {}: browser upgraded", session.id());
        })
}
