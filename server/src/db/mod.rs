pub mod dynamodb;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::PlayerScore;
use crate::error::StoreError;

pub use dynamodb::DynamoScoreStore;
pub use memory::MemoryScoreStore;

/// Durable mapping from player id to current score; the single source of truth.
///
/// Writes for one player are linearized by the store. `put` replaces the
/// score outright, `add` applies a delta atomically and creates the row when
/// missing. A `None` name keeps whatever name is stored (or `Anonymous` for a
/// new row).
#[async_trait]
pub trait ScoreStore: Send + Sync {
    async fn put(
        &self,
        player_id: &str,
        player_name: Option<&str>,
        score: i64,
        at: DateTime<Utc>,
    ) -> Result<PlayerScore, StoreError>;

    async fn add(
        &self,
        player_id: &str,
        player_name: Option<&str>,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<PlayerScore, StoreError>;

    async fn get(&self, player_id: &str) -> Result<Option<PlayerScore>, StoreError>;

    async fn get_all(&self) -> Result<Vec<PlayerScore>, StoreError>;
}

/// Blank names count as absent.
pub(crate) fn supplied_name(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|name| !name.is_empty())
}
