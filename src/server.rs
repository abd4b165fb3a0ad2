//! Health and Prometheus endpoints for the continuous relay loop

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::metrics::Metrics;

/// Relay progress shared between the watcher and the HTTP server.
///
/// Written by the watcher after every poll; never read back by it.
#[derive(Debug, Default, Clone)]
pub struct RelayerStats {
    /// Next message id to relay
    pub cursor: u64,
    /// Last id assigned by the source queue at the latest poll
    pub latest_message_id: u64,
    /// Messages relayed since start
    pub relayed_count: u64,
    /// Completed polls of the source queue
    pub polls: u64,
    /// Fatal error that stopped the loop, if any
    pub last_error: Option<String>,
}

pub type SharedStats = Arc<RwLock<RelayerStats>>;
pub type SharedMetrics = Arc<Metrics>;

#[derive(Clone)]
pub struct AppState {
    pub stats: SharedStats,
    pub metrics: SharedMetrics,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub cursor: u64,
    pub latest_message_id: u64,
    pub backlog: u64,
    pub relayed_count: u64,
    pub polls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl HealthResponse {
    fn from_stats(stats: &RelayerStats) -> Self {
        let status = if stats.last_error.is_some() {
            "halted"
        } else {
            "healthy"
        };
        Self {
            status: status.to_string(),
            cursor: stats.cursor,
            latest_message_id: stats.latest_message_id,
            // cursor points one past the last relayed id
            backlog: (stats.latest_message_id + 1).saturating_sub(stats.cursor),
            relayed_count: stats.relayed_count,
            polls: stats.polls,
            last_error: stats.last_error.clone(),
        }
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.stats.read().await;
    Json(HealthResponse::from_stats(&stats))
}

/// Process is up
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness probe: ready once the source queue has been polled and the loop is not halted
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let stats = state.stats.read().await;
    if stats.polls > 0 && stats.last_error.is_none() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let stats = state.stats.read().await;
    state
        .metrics
        .set_progress(stats.cursor, stats.latest_message_id);
    drop(stats);

    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    match encoder.encode(&state.metrics.registry.gather(), &mut body) {
        Ok(()) => (
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {}", e),
        )
            .into_response(),
    }
}

pub fn router(stats: SharedStats, metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(AppState { stats, metrics })
}

/// Serve `router` on `bind_address:port` until the listener fails
pub async fn start_server(
    bind_address: &str,
    port: u16,
    stats: SharedStats,
    metrics: SharedMetrics,
) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!(%addr, "Serving /health, /healthz, /readyz and /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(stats, metrics)).await?;

    Ok(())
}
