use anyhow::Result;
use std::sync::Arc;
use tokio::time::Duration;

use leaderboard_server::db::{MemoryScoreStore, ScoreStore};
use leaderboard_server::leaderboard_server::{LeaderboardServer, LeaderboardServerConfig};
use leaderboard_server::retry::RetryPolicy;
use leaderboard_server::sync_server::SyncServer;

/// Builder for a server on an ephemeral local port backed by an in-memory store.
pub struct TestServerBuilder {
    store: Arc<dyn ScoreStore>,
    retry: RetryPolicy,
    send_timeout: Duration,
    resync_interval: Option<Duration>,
}

impl TestServerBuilder {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryScoreStore::new()),
            retry: RetryPolicy::new(5, Duration::from_millis(1)),
            send_timeout: Duration::from_millis(500),
            resync_interval: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ScoreStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }

    pub async fn build(self) -> Result<TestServer> {
        let server = LeaderboardServer::start(LeaderboardServerConfig {
            store: self.store.clone(),
            http_addr: "127.0.0.1:0".to_string(),
            retry: self.retry,
            send_timeout: self.send_timeout,
            resync_interval: self.resync_interval,
        })
        .await?;

        Ok(TestServer {
            server,
            store: self.store,
        })
    }
}

pub struct TestServer {
    server: LeaderboardServer,
    pub store: Arc<dyn ScoreStore>,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        self.server.ws_url()
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.server.http_addr(), path)
    }

    pub fn sync(&self) -> &Arc<SyncServer> {
        self.server.sync()
    }

    pub async fn shutdown(self) -> Result<()> {
        self.server.shutdown().await
    }
}
