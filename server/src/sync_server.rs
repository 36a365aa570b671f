use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::{ClientMessage, LeaderboardSnapshot, PlayerScore, ServerMessage};
use crate::db::ScoreStore;
use crate::error::{ConnectionLost, MessageError, StoreError, UpdateError};
use crate::leaderboard_cache::LeaderboardCache;
use crate::player_connections::{BroadcastReport, ConnectionId, ConnectionRegistry, OutboundFrame};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy)]
enum ScoreUpdate {
    Set(i64),
    Add(i64),
}

/// A score update the store accepted.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The new ranking was installed and broadcast.
    Published(Arc<LeaderboardSnapshot>),
    /// Stored, but the ranking refresh failed. The next update or resync
    /// publishes it.
    Deferred(PlayerScore),
}

impl UpdateOutcome {
    pub fn snapshot(&self) -> Option<&Arc<LeaderboardSnapshot>> {
        match self {
            UpdateOutcome::Published(snapshot) => Some(snapshot),
            UpdateOutcome::Deferred(_) => None,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, UpdateOutcome::Published(_))
    }
}

/// Orchestrates store writes, cache refreshes and fan-out.
///
/// One instance owns the whole shared leaderboard state; hand it around as
/// `Arc<SyncServer>`.
pub struct SyncServer {
    store: Arc<dyn ScoreStore>,
    cache: LeaderboardCache,
    registry: ConnectionRegistry,
    retry: RetryPolicy,
}

impl SyncServer {
    pub fn new(store: Arc<dyn ScoreStore>, retry: RetryPolicy, send_timeout: Duration) -> Self {
        Self {
            store,
            cache: LeaderboardCache::new(),
            registry: ConnectionRegistry::new(send_timeout),
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn ScoreStore> {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Load the initial view from the store.
    pub async fn initialize(&self) -> Result<Arc<LeaderboardSnapshot>, UpdateError> {
        let snapshot = self.refresh_with_retry().await?;
        info!("Leaderboard loaded with {} players", snapshot.len());
        Ok(snapshot)
    }

    /// Current view for late joiners and read endpoints.
    pub async fn snapshot(&self) -> Arc<LeaderboardSnapshot> {
        self.cache.current().await
    }

    /// Replace a player's score. `origin` is the connection that sent the
    /// update, if any; it alone is told about failures.
    pub async fn set_score(
        &self,
        origin: Option<ConnectionId>,
        player_id: &str,
        player_name: Option<&str>,
        score: i64,
    ) -> Result<UpdateOutcome, UpdateError> {
        self.apply(origin, player_id, player_name, ScoreUpdate::Set(score))
            .await
    }

    /// Add points to a player's score, creating the player at `points` when new.
    pub async fn add_points(
        &self,
        origin: Option<ConnectionId>,
        player_id: &str,
        player_name: Option<&str>,
        points: i64,
    ) -> Result<UpdateOutcome, UpdateError> {
        self.apply(origin, player_id, player_name, ScoreUpdate::Add(points))
            .await
    }

    /// `Err` only when nothing was written. Once the store accepts the write
    /// the update is never reported as failed, even if publishing it is
    /// deferred.
    async fn apply(
        &self,
        origin: Option<ConnectionId>,
        player_id: &str,
        player_name: Option<&str>,
        update: ScoreUpdate,
    ) -> Result<UpdateOutcome, UpdateError> {
        debug!("Applying {:?} for player {}", update, player_id);
        let at = Utc::now();
        let store = self.store.as_ref();

        let written = self
            .retry
            .run("apply score update", move || match update {
                ScoreUpdate::Set(score) => store.put(player_id, player_name, score, at),
                ScoreUpdate::Add(delta) => store.add(player_id, player_name, delta, at),
            })
            .await;
        let row = match written {
            Ok(row) => row,
            Err(e) => {
                if let Some(origin) = origin {
                    self.notify_failure(origin, player_id, &e).await;
                }
                return Err(e);
            }
        };
        info!("Player {} now at {} points", row.player_id, row.score);

        match self.refresh_and_broadcast().await {
            Ok(snapshot) => Ok(UpdateOutcome::Published(snapshot)),
            Err(e) => {
                warn!(
                    "Score for {} stored but leaderboard refresh failed, publishing on next refresh: {}",
                    row.player_id, e
                );
                if let Some(origin) = origin {
                    self.notify_pending(origin, &row, &e).await;
                }
                Ok(UpdateOutcome::Deferred(row))
            }
        }
    }

    async fn refresh_with_retry(&self) -> Result<Arc<LeaderboardSnapshot>, UpdateError> {
        let store = self.store.as_ref();
        let cache = &self.cache;
        self.retry
            .run("refresh leaderboard", move || cache.refresh(store))
            .await
    }

    async fn refresh_and_broadcast(&self) -> Result<Arc<LeaderboardSnapshot>, UpdateError> {
        let snapshot = self.refresh_with_retry().await?;
        self.broadcast(&snapshot).await;
        Ok(snapshot)
    }

    /// Push a snapshot to every registered connection.
    pub async fn broadcast(&self, snapshot: &LeaderboardSnapshot) -> BroadcastReport {
        match OutboundFrame::snapshot(snapshot) {
            Ok(frame) => self.registry.broadcast(frame).await,
            Err(e) => {
                error!("Failed to serialize leaderboard version {}: {}", snapshot.version, e);
                BroadcastReport::default()
            }
        }
    }

    async fn notify_failure(&self, origin: ConnectionId, player_id: &str, error: &UpdateError) {
        let message = ServerMessage::UpdateFailed {
            player_id: player_id.to_string(),
            reason: error.to_string(),
            attempts: error.attempts(),
        };
        if let Err(e) = self.send_message(origin, &message).await {
            debug!("Could not report failed update to {}: {}", origin, e);
        }
    }

    async fn notify_pending(&self, origin: ConnectionId, row: &PlayerScore, error: &UpdateError) {
        let message = ServerMessage::UpdatePending {
            player_id: row.player_id.clone(),
            score: row.score,
            reason: error.to_string(),
        };
        if let Err(e) = self.send_message(origin, &message).await {
            debug!("Could not report pending update to {}: {}", origin, e);
        }
    }

    /// Send a message to one connection only.
    pub async fn send_message(
        &self,
        id: ConnectionId,
        message: &ServerMessage,
    ) -> Result<(), ConnectionLost> {
        match OutboundFrame::message(message) {
            Ok(frame) => self.registry.send_to(id, frame).await,
            Err(e) => {
                error!("Failed to serialize message for {}: {}", id, e);
                Ok(())
            }
        }
    }

    async fn send_snapshot(
        &self,
        id: ConnectionId,
        snapshot: &LeaderboardSnapshot,
    ) -> Result<(), ConnectionLost> {
        match OutboundFrame::snapshot(snapshot) {
            Ok(frame) => self.registry.send_to(id, frame).await,
            Err(e) => {
                error!("Failed to serialize leaderboard for {}: {}", id, e);
                Ok(())
            }
        }
    }

    /// Register a new connection and immediately send it the current view.
    pub async fn connect(&self, sender: mpsc::Sender<OutboundFrame>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.registry.register(id, sender).await;

        let snapshot = self.cache.current().await;
        if let Err(e) = self.send_snapshot(id, &snapshot).await {
            warn!("Initial leaderboard for {} not delivered: {}", id, e);
        }
        id
    }

    /// Idempotent; returns whether the connection was still registered.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        self.registry.unregister(id).await
    }

    /// Handle one inbound live-channel message from `id`.
    ///
    /// Malformed messages are answered with an error to the sender only and
    /// never reach the store.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) -> Result<(), MessageError> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Rejecting message from {}: {}", id, e);
                let reply = ServerMessage::Error {
                    reason: e.to_string(),
                };
                self.send_message(id, &reply).await?;
                return Err(e.into());
            }
        };

        match message {
            ClientMessage::UpdateScore { player_id, points } => {
                self.add_points(Some(id), &player_id, None, points).await?;
            }
            ClientMessage::SubmitScore {
                player_id,
                player_name,
                score,
            } => {
                self.set_score(Some(id), &player_id, player_name.as_deref(), score)
                    .await?;
            }
            ClientMessage::GetLeaderboard => {
                let snapshot = self.cache.current().await;
                self.send_snapshot(id, &snapshot).await?;
            }
        }
        Ok(())
    }

    /// Re-read the store and broadcast if the ranking changed. Picks up rows
    /// written by other writers of the same table.
    pub async fn resync(&self) -> Result<bool, StoreError> {
        match self.cache.refresh_if_changed(self.store.as_ref()).await? {
            Some(snapshot) => {
                debug!("Resync found changes, broadcasting version {}", snapshot.version);
                self.broadcast(&snapshot).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Periodically resync until cancelled.
    pub fn spawn_resync_task(
        self: Arc<Self>,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Leaderboard resync task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if self.registry.is_empty().await {
                            continue;
                        }
                        if let Err(e) = self.resync().await {
                            error!("Failed to resync leaderboard: {}", e);
                        }
                    }
                }
            }
        })
    }
}
