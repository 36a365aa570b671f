use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::ScoreStore;
use crate::http_server::{HttpServerState, run_http_server};
use crate::retry::RetryPolicy;
use crate::sync_server::SyncServer;

/// Configuration for a leaderboard server instance
pub struct LeaderboardServerConfig {
    pub store: Arc<dyn ScoreStore>,
    /// HTTP/WebSocket listen address (e.g., "127.0.0.1:8765"; port 0 picks a free one)
    pub http_addr: String,
    pub retry: RetryPolicy,
    pub send_timeout: Duration,
    pub resync_interval: Option<Duration>,
}

/// A running server: HTTP + WebSocket ingress and the optional resync task.
pub struct LeaderboardServer {
    http_addr: SocketAddr,
    sync: Arc<SyncServer>,
    cancellation_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl LeaderboardServer {
    pub async fn start(config: LeaderboardServerConfig) -> Result<Self> {
        let LeaderboardServerConfig {
            store,
            http_addr,
            retry,
            send_timeout,
            resync_interval,
        } = config;

        let sync = Arc::new(SyncServer::new(store, retry, send_timeout));
        sync.initialize()
            .await
            .context("Failed to load initial leaderboard")?;

        let cancellation_token = CancellationToken::new();
        let mut handles = Vec::new();

        let listener = TcpListener::bind(&http_addr)
            .await
            .with_context(|| format!("Failed to bind {}", http_addr))?;
        let http_addr = listener.local_addr()?;

        let state = HttpServerState {
            sync: sync.clone(),
            cancellation_token: cancellation_token.clone(),
            connection_count: Arc::new(AtomicUsize::new(0)),
        };
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_http_server(listener, state).await {
                error!("HTTP server stopped: {:#}", e);
            }
        }));

        if let Some(interval) = resync_interval {
            info!("Resyncing leaderboard from the store every {:?}", interval);
            handles.push(sync.clone().spawn_resync_task(interval, cancellation_token.clone()));
        }

        Ok(Self {
            http_addr,
            sync,
            cancellation_token,
            handles,
        })
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.http_addr)
    }

    pub fn sync(&self) -> &Arc<SyncServer> {
        &self.sync
    }

    /// Cancel all tasks and wait for them to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down leaderboard server on {}", self.http_addr);
        self.cancellation_token.cancel();

        for handle in self.handles {
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Task ended abnormally during shutdown: {}", e),
                Err(_) => warn!("Task did not stop within 10 seconds"),
            }
        }
        Ok(())
    }
}
