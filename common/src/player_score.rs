use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Display name used when a player never supplied one.
pub const ANONYMOUS: &str = "Anonymous";

/// Current score of a single player. One row per `player_id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerScore {
    pub player_id: String,
    pub player_name: String,
    pub score: i64,
    pub last_updated: DateTime<Utc>,
}

impl PlayerScore {
    pub fn new(
        player_id: impl Into<String>,
        player_name: Option<&str>,
        score: i64,
        last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            player_name: display_name(player_name),
            score,
            last_updated,
        }
    }

    /// Leaderboard order: score descending, then earlier update first.
    /// Player id breaks the remaining ties so the order is total.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| self.last_updated.cmp(&other.last_updated))
            .then_with(|| self.player_id.cmp(&other.player_id))
    }
}

/// Normalizes an optional, possibly blank name into the stored display name.
pub fn display_name(name: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => ANONYMOUS.to_string(),
    }
}

/// Fully sorted leaderboard view.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LeaderboardSnapshot {
    /// Bumped on every refresh; clients can drop anything older than what they hold.
    pub version: u64,
    pub entries: Vec<PlayerScore>,
    pub generated_at: DateTime<Utc>,
}

impl LeaderboardSnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            entries: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    /// Builds a snapshot from unordered store contents.
    pub fn from_scores(version: u64, mut scores: Vec<PlayerScore>) -> Self {
        scores.sort_by(PlayerScore::rank_cmp);
        Self {
            version,
            entries: scores,
            generated_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn top(&self, limit: usize) -> &[PlayerScore] {
        &self.entries[..limit.min(self.entries.len())]
    }

    /// Zero-based rank of a player, if present.
    pub fn position(&self, player_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.player_id == player_id)
    }

    pub fn get(&self, player_id: &str) -> Option<&PlayerScore> {
        self.entries.iter().find(|e| e.player_id == player_id)
    }

    /// True when both snapshots rank the same rows identically, ignoring version.
    pub fn same_ranking(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}
