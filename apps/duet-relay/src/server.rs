use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::handlers::{create_room, health_check, metrics_handler, relay_stats};
use crate::relay::Relay;
use crate::websocket::websocket_handler;

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub metrics: Option<PrometheusHandle>,
    /// Cadence of server-sent WebSocket pings. `None` never pings.
    pub heartbeat_interval: Option<Duration>,
}

impl AppState {
    pub fn new(metrics: Option<PrometheusHandle>) -> Self {
        Self {
            relay: Relay::new(),
            metrics,
            heartbeat_interval: None,
        }
    }
}

pub fn build_router(mut state: AppState, config: &Config) -> Router {
    state.heartbeat_interval =
        (!config.heartbeat_interval.is_zero()).then_some(config.heartbeat_interval);

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(relay_stats))
        .route("/metrics", get(metrics_handler))
        .route("/rooms", post(create_room))
        .route("/ws", get(websocket_handler))
        .with_state(state);

    let router = if config.serve_static {
        let index = config.static_dir.join("index.html");
        router.fallback_service(ServeDir::new(&config.static_dir).fallback(ServeFile::new(index)))
    } else {
        router
    };

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the relay on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    config: &Config,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let monitor = config.idle_timeout.map(|timeout| {
        info!(
            idle_timeout_secs = timeout.as_secs(),
            interval_secs = config.heartbeat_interval.as_secs(),
            "idle pruning enabled"
        );
        state
            .relay
            .spawn_idle_monitor(config.heartbeat_interval, timeout)
    });

    let app = build_router(state, config);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server shutdown with error");

    if let Some(handle) = monitor {
        handle.abort();
    }
    result
}
