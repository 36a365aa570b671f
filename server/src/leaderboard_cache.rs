use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use common::LeaderboardSnapshot;
use crate::db::ScoreStore;
use crate::error::StoreError;

/// In-memory sorted view of the store.
///
/// Every refresh is a full rescan and resort. Refreshes are serialized, and
/// the scan happens while holding the refresh lock, so installed snapshots
/// always move forward in store time.
pub struct LeaderboardCache {
    current: RwLock<Arc<LeaderboardSnapshot>>,
    refresh_lock: Mutex<()>,
}

impl Default for LeaderboardCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderboardCache {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(LeaderboardSnapshot::empty())),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Last computed view, without touching the store.
    pub async fn current(&self) -> Arc<LeaderboardSnapshot> {
        self.current.read().await.clone()
    }

    /// Recompute the view from the store and install it.
    pub async fn refresh(&self, store: &dyn ScoreStore) -> Result<Arc<LeaderboardSnapshot>, StoreError> {
        let _guard = self.refresh_lock.lock().await;
        let rows = store.get_all().await?;
        Ok(self.install(LeaderboardSnapshot::from_scores(0, rows)).await)
    }

    /// Like `refresh`, but only installs (and bumps the version) when the
    /// ranking differs from the current one.
    pub async fn refresh_if_changed(
        &self,
        store: &dyn ScoreStore,
    ) -> Result<Option<Arc<LeaderboardSnapshot>>, StoreError> {
        let _guard = self.refresh_lock.lock().await;
        let rows = store.get_all().await?;
        let candidate = LeaderboardSnapshot::from_scores(0, rows);

        if self.current.read().await.same_ranking(&candidate) {
            return Ok(None);
        }
        Ok(Some(self.install(candidate).await))
    }

    // Caller must hold `refresh_lock`.
    async fn install(&self, mut snapshot: LeaderboardSnapshot) -> Arc<LeaderboardSnapshot> {
        let mut current = self.current.write().await;
        snapshot.version = current.version + 1;
        let snapshot = Arc::new(snapshot);
        *current = snapshot.clone();
        debug!(
            "Installed leaderboard version {} with {} players",
            snapshot.version,
            snapshot.len()
        );
        snapshot
    }
}
