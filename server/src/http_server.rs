use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Query, State, ws::WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use common::PlayerScore;
use crate::sync_server::SyncServer;
use crate::ws_server::handle_websocket;

const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Shared state for the HTTP and WebSocket handlers
#[derive(Clone)]
pub struct HttpServerState {
    pub sync: Arc<SyncServer>,
    /// Cancellation token for graceful shutdown
    pub cancellation_token: CancellationToken,
    /// Active WebSocket connection count
    pub connection_count: Arc<AtomicUsize>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    /// Number of entries to return (default: 10, max: 100)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub status: String,
    pub version: u64,
    pub total: usize,
    pub data: Vec<PlayerScore>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub connections: usize,
    pub players: usize,
    pub version: u64,
}

pub fn router(state: HttpServerState) -> Router {
    // The browser UI is served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .route("/api/leaderboard", get(get_leaderboard))
        .route("/api/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve HTTP and WebSocket endpoints on an already bound listener until cancelled.
pub async fn run_http_server(listener: TcpListener, state: HttpServerState) -> Result<()> {
    let cancellation_token = state.cancellation_token.clone();
    info!("HTTP server (API + WebSocket) listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancellation_token.cancelled().await;
            info!("HTTP server received shutdown signal");
        })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))
}

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<HttpServerState>,
) -> impl IntoResponse {
    let count = state.connection_count.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::debug!("WebSocket connection opened, total connections: {}", count);

    let connection_count = state.connection_count.clone();

    ws.on_upgrade(move |socket| async move {
        handle_websocket(socket, state.sync, state.cancellation_token).await;

        let count = connection_count.fetch_sub(1, Ordering::Relaxed) - 1;
        tracing::debug!("WebSocket connection closed, total connections: {}", count);
    })
}

/// Top of the current leaderboard, served from the cache.
async fn get_leaderboard(
    State(state): State<HttpServerState>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<LeaderboardResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    let snapshot = state.sync.snapshot().await;

    Json(LeaderboardResponse {
        status: "success".to_string(),
        version: snapshot.version,
        total: snapshot.len(),
        data: snapshot.top(limit).to_vec(),
    })
}

async fn get_status(State(state): State<HttpServerState>) -> Json<StatusResponse> {
    let snapshot = state.sync.snapshot().await;
    Json(StatusResponse {
        status: "ok".to_string(),
        connections: state.sync.registry().len().await,
        players: snapshot.len(),
        version: snapshot.version,
    })
}

async fn health_check() -> &'static str {
    "OK"
}
