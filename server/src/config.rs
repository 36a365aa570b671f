use anyhow::{Context, Result, bail};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::db::{DynamoScoreStore, MemoryScoreStore, ScoreStore};
use crate::retry::RetryPolicy;

/// Which score store backs the leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    DynamoDb,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dynamodb" | "dynamo" => Ok(StoreBackend::DynamoDb),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => bail!("unknown store backend `{}` (expected `dynamodb` or `memory`)", other),
        }
    }
}

/// Process configuration, read from `LEADERBOARD_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub store: StoreBackend,
    /// DynamoDB table name
    pub table_name: String,
    /// Per-connection send timeout; slower clients are dropped
    pub send_timeout: Duration,
    pub retry: RetryPolicy,
    /// `None` disables the periodic resync
    pub resync_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8765,
            store: StoreBackend::DynamoDb,
            table_name: "Leaderboard".to_string(),
            send_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            resync_interval: Some(Duration::from_secs(1)),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}=`{}`: {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let retry = RetryPolicy {
            max_attempts: env_or("LEADERBOARD_RETRY_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: Duration::from_millis(env_or(
                "LEADERBOARD_RETRY_BASE_MS",
                defaults.retry.base_delay.as_millis() as u64,
            )?),
            ..defaults.retry.clone()
        };
        let resync_ms: u64 = env_or(
            "LEADERBOARD_RESYNC_INTERVAL_MS",
            defaults.resync_interval.map_or(0, |d| d.as_millis() as u64),
        )?;

        Ok(Self {
            http_port: env_or("LEADERBOARD_HTTP_PORT", defaults.http_port)?,
            store: env_or("LEADERBOARD_STORE", defaults.store)?,
            table_name: env::var("LEADERBOARD_TABLE").unwrap_or(defaults.table_name),
            send_timeout: Duration::from_millis(env_or(
                "LEADERBOARD_SEND_TIMEOUT_MS",
                defaults.send_timeout.as_millis() as u64,
            )?),
            retry,
            resync_interval: (resync_ms > 0).then(|| Duration::from_millis(resync_ms)),
        })
    }

    pub fn http_addr(&self) -> String {
        format!("0.0.0.0:{}", self.http_port)
    }

    pub async fn build_store(&self) -> Result<Arc<dyn ScoreStore>> {
        match self.store {
            StoreBackend::DynamoDb => {
                let store = DynamoScoreStore::from_env(&self.table_name)
                    .await
                    .context("Failed to initialize DynamoDB score store")?;
                Ok(Arc::new(store))
            }
            StoreBackend::Memory => {
                info!("Using in-memory score store; scores are lost on restart");
                Ok(Arc::new(MemoryScoreStore::new()))
            }
        }
    }
}
