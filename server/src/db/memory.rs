use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use common::PlayerScore;
use super::{ScoreStore, supplied_name};
use crate::error::StoreError;

/// Process-local store used for tests and `LEADERBOARD_STORE=memory` runs.
#[derive(Default)]
pub struct MemoryScoreStore {
    rows: RwLock<HashMap<String, PlayerScore>>,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    async fn put(
        &self,
        player_id: &str,
        player_name: Option<&str>,
        score: i64,
        at: DateTime<Utc>,
    ) -> Result<PlayerScore, StoreError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .entry(player_id.to_string())
            .or_insert_with(|| PlayerScore::new(player_id, None, score, at));
        if let Some(name) = supplied_name(player_name) {
            row.player_name = name.to_string();
        }
        row.score = score;
        row.last_updated = at;
        Ok(row.clone())
    }

    async fn add(
        &self,
        player_id: &str,
        player_name: Option<&str>,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<PlayerScore, StoreError> {
        let mut rows = self.rows.write().await;
        let current = rows.get(player_id).map(|row| row.score).unwrap_or(0);
        let score = current.checked_add(delta).ok_or_else(|| StoreError::Rejected {
            player_id: player_id.to_string(),
            reason: format!("adding {} to {} overflows", delta, current),
        })?;

        let row = rows
            .entry(player_id.to_string())
            .or_insert_with(|| PlayerScore::new(player_id, None, 0, at));
        if let Some(name) = supplied_name(player_name) {
            row.player_name = name.to_string();
        }
        row.score = score;
        row.last_updated = at;
        Ok(row.clone())
    }

    async fn get(&self, player_id: &str) -> Result<Option<PlayerScore>, StoreError> {
        Ok(self.rows.read().await.get(player_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<PlayerScore>, StoreError> {
        Ok(self.rows.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ANONYMOUS;

    #[tokio::test]
    async fn put_overwrites_score() {
        let store = MemoryScoreStore::new();
        store.put("p1", Some("Al"), 10, Utc::now()).await.unwrap();
        let row = store.put("p1", None, 5, Utc::now()).await.unwrap();

        assert_eq!(row.score, 5);
        assert_eq!(row.player_name, "Al");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn add_creates_missing_player() {
        let store = MemoryScoreStore::new();
        let row = store.add("p2", None, 7, Utc::now()).await.unwrap();

        assert_eq!(row.score, 7);
        assert_eq!(row.player_name, ANONYMOUS);
        assert_eq!(store.get("p2").await.unwrap(), Some(row));
    }

    #[tokio::test]
    async fn add_accumulates_and_renames() {
        let store = MemoryScoreStore::new();
        store.add("p3", None, 7, Utc::now()).await.unwrap();
        let row = store.add("p3", Some("Cy"), -2, Utc::now()).await.unwrap();

        assert_eq!(row.score, 5);
        assert_eq!(row.player_name, "Cy");
    }

    #[tokio::test]
    async fn add_rejects_overflow_without_mutating() {
        let store = MemoryScoreStore::new();
        store.put("p4", None, i64::MAX, Utc::now()).await.unwrap();

        let err = store.add("p4", None, 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert_eq!(store.get("p4").await.unwrap().unwrap().score, i64::MAX);
    }
}
