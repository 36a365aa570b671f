use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};

use common::PlayerScore;
use leaderboard_server::db::{MemoryScoreStore, ScoreStore};
use leaderboard_server::error::StoreError;

/// In-memory store that can be told to fail the next N reads or writes with
/// `StoreError::Unavailable`.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryScoreStore,
    failing_writes: AtomicU32,
    failing_reads: AtomicU32,
    write_attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Total `put`/`add` calls, failed ones included.
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_writes) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if Self::take_failure(&self.failing_reads) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ScoreStore for FlakyStore {
    async fn put(
        &self,
        player_id: &str,
        player_name: Option<&str>,
        score: i64,
        at: DateTime<Utc>,
    ) -> Result<PlayerScore, StoreError> {
        self.check_write()?;
        self.inner.put(player_id, player_name, score, at).await
    }

    async fn add(
        &self,
        player_id: &str,
        player_name: Option<&str>,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<PlayerScore, StoreError> {
        self.check_write()?;
        self.inner.add(player_id, player_name, delta, at).await
    }

    async fn get(&self, player_id: &str) -> Result<Option<PlayerScore>, StoreError> {
        self.check_read()?;
        self.inner.get(player_id).await
    }

    async fn get_all(&self) -> Result<Vec<PlayerScore>, StoreError> {
        self.check_read()?;
        self.inner.get_all().await
    }
}
