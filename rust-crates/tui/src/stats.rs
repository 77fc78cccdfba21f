//! Game history and aggregates kept by the hosted stats backend.
//!
//! Everything here is best effort. Reads fall back to zeroed values, writes
//! are logged and forgotten, and nothing is ever retried: the backend has no
//! uniqueness constraint on the transaction hash, so a retry could count a
//! game twice.

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
};
use std::future::Future;
use tracing::warn;

use crate::session::CoinSide;

pub mod outbox;
pub mod rest_store;

pub use outbox::{
    StatsCommand,
    StatsOutbox,
    StatsSnapshot,
    stats_worker,
};
pub use rest_store::RestStatsStore;

pub const RECENT_GAMES_LIMIT: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("stats request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("stats backend responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid stats payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One finished round as sent to the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewGameRecord {
    pub wallet_address: String,
    pub choice: CoinSide,
    pub result: CoinSide,
    pub won: bool,
    pub bet_amount: String,
    pub transaction_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct GameRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub wallet_address: String,
    pub choice: CoinSide,
    pub result: CoinSide,
    pub won: bool,
    pub bet_amount: String,
    pub transaction_hash: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct GameStats {
    #[serde(default, deserialize_with = "null_as_zero")]
    pub total_games: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub total_wins: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub total_losses: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub heads_count: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub tails_count: u64,
}

impl GameStats {
    pub fn win_rate_percent(&self) -> f64 {
        percent(self.total_wins, self.total_games)
    }

    pub fn heads_percent(&self) -> f64 {
        percent(self.heads_count, self.total_games)
    }

    pub fn tails_percent(&self) -> f64 {
        percent(self.tails_count, self.total_games)
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / whole as f64
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or_default())
}

/// Raw access to the backend; errors are reported as-is.
pub trait StatsStore {
    fn insert_game(
        &self,
        record: &NewGameRecord,
    ) -> impl Future<Output = Result<(), StatsError>> + Send;

    fn global_stats(&self) -> impl Future<Output = Result<GameStats, StatsError>> + Send;

    fn player_stats(
        &self,
        wallet_address: &str,
    ) -> impl Future<Output = Result<GameStats, StatsError>> + Send;

    fn recent_games(
        &self,
        wallet_address: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<GameRecord>, StatsError>> + Send;
}

/// Best-effort front for a [`StatsStore`]. A gateway without a store (no
/// backend configured) behaves like a backend that always fails.
#[derive(Clone, Debug)]
pub struct StatsGateway<S> {
    store: Option<S>,
}

impl<S: StatsStore> StatsGateway<S> {
    pub fn new(store: S) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Returns whether the backend accepted the record.
    pub async fn record_game(&self, record: &NewGameRecord) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.insert_game(record).await {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, transaction_hash = %record.transaction_hash, "failed to record game");
                false
            }
        }
    }

    pub async fn global_stats(&self) -> GameStats {
        let Some(store) = &self.store else {
            return GameStats::default();
        };
        store.global_stats().await.unwrap_or_else(|err| {
            warn!(%err, "failed to fetch global stats");
            GameStats::default()
        })
    }

    pub async fn player_stats(&self, wallet_address: &str) -> GameStats {
        let Some(store) = &self.store else {
            return GameStats::default();
        };
        store
            .player_stats(wallet_address)
            .await
            .unwrap_or_else(|err| {
                warn!(%err, wallet_address, "failed to fetch player stats");
                GameStats::default()
            })
    }

    pub async fn recent_games(
        &self,
        wallet_address: Option<&str>,
        limit: usize,
    ) -> Vec<GameRecord> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        store
            .recent_games(wallet_address, limit)
            .await
            .unwrap_or_else(|err| {
                warn!(%err, "failed to fetch recent games");
                Vec::new()
            })
    }
}
