use std::{
    collections::HashSet,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time,
};
use tracing::{
    debug,
    info,
    warn,
};

use super::{
    GameRecord,
    GameStats,
    NewGameRecord,
    RECENT_GAMES_LIMIT,
    StatsGateway,
    StatsStore,
};

pub const STATS_POLL_INTERVAL: Duration = Duration::from_secs(15);

pub enum StatsCommand {
    Record(NewGameRecord),
    FetchNow,
    Shutdown,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsSnapshot {
    pub global: GameStats,
    pub player: Option<GameStats>,
    pub recent: Vec<GameRecord>,
}

/// Pending stat writes. Each finished round is handed to the worker at most
/// once, keyed by transaction hash; delivery is not retried.
pub struct StatsOutbox {
    commands: mpsc::UnboundedSender<StatsCommand>,
    dispatched: HashSet<String>,
}

impl StatsOutbox {
    pub fn new(commands: mpsc::UnboundedSender<StatsCommand>) -> Self {
        Self {
            commands,
            dispatched: HashSet::new(),
        }
    }

    /// Returns false when the round was already handed off.
    pub fn enqueue(&mut self, record: NewGameRecord) -> bool {
        if !self.dispatched.insert(record.transaction_hash.clone()) {
            debug!(transaction_hash = %record.transaction_hash, "game already recorded");
            return false;
        }
        if self.commands.send(StatsCommand::Record(record)).is_err() {
            warn!("stats worker stopped; dropping game record");
        }
        true
    }

    pub fn request_refresh(&self) {
        let _ = self.commands.send(StatsCommand::FetchNow);
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(StatsCommand::Shutdown);
    }
}

/// Keeps the stats panel fresh and drains the outbox. Exits on `Shutdown`,
/// when every command sender is gone, or when nobody listens for snapshots.
pub async fn stats_worker<S: StatsStore>(
    gateway: StatsGateway<S>,
    wallet_address: Option<String>,
    poll_interval: Duration,
    mut cmd_rx: mpsc::UnboundedReceiver<StatsCommand>,
    snapshot_tx: mpsc::UnboundedSender<StatsSnapshot>,
) {
    async fn fetch_snapshot<S: StatsStore>(
        gateway: &StatsGateway<S>,
        wallet_address: Option<&str>,
    ) -> StatsSnapshot {
        let player = async {
            match wallet_address {
                Some(wallet) => Some(gateway.player_stats(wallet).await),
                None => None,
            }
        };
        let (global, player, recent) = futures::join!(
            gateway.global_stats(),
            player,
            gateway.recent_games(wallet_address, RECENT_GAMES_LIMIT),
        );
        StatsSnapshot {
            global,
            player,
            recent,
        }
    }

    if !gateway.is_enabled() {
        info!("stats backend not configured; stats panel disabled");
    }
    let mut ticker = time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(StatsCommand::Record(record)) => {
                        if gateway.record_game(&record).await {
                            info!(transaction_hash = %record.transaction_hash, "game recorded");
                        }
                    }
                    Some(StatsCommand::FetchNow) => {}
                    Some(StatsCommand::Shutdown) | None => break,
                }
            }
        }
        let snapshot = fetch_snapshot(&gateway, wallet_address.as_deref()).await;
        if snapshot_tx.send(snapshot).is_err() {
            debug!("stats snapshot receiver dropped");
            break;
        }
    }
}
