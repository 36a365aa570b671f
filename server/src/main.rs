use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leaderboard_server::config::ServerConfig;
use leaderboard_server::leaderboard_server::{LeaderboardServer, LeaderboardServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if exists
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    info!("Starting leaderboard server with {:?}", config);

    let store = config.build_store().await?;
    let server = LeaderboardServer::start(LeaderboardServerConfig {
        store,
        http_addr: config.http_addr(),
        retry: config.retry.clone(),
        send_timeout: config.send_timeout,
        resync_interval: config.resync_interval,
    })
    .await?;
    info!("WebSocket endpoint: {}", server.ws_url());

    info!("Server started. Waiting for shutdown signal (Ctrl+C)...");
    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal. Shutting down gracefully...");
    server.shutdown().await?;

    info!("Server shut down successfully");
    Ok(())
}
