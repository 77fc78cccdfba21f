//! Runs the session against real gateways.
//!
//! The driver owns the [`Session`] and is the only thing that steps it. Effects
//! are executed as spawned tasks whose results come back through one event
//! queue, so the session sees every completion in order and never re-entrantly.

use alloy::primitives::U256;
use std::future::Future;
use tokio::{
    sync::mpsc,
    time,
};
use tracing::{
    error,
    warn,
};

use crate::{
    chain::{
        ChainError,
        ChainGateway,
        Confirmation,
        PlayerStats,
        decode_game_event,
    },
    session::{
        Effect,
        Session,
        SessionError,
        SessionEvent,
    },
    stats::StatsOutbox,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverEvent {
    Session(SessionEvent),
    PlayerStats(PlayerStats),
    MinBet(U256),
}

pub struct GameDriver<C> {
    session: Session,
    chain: C,
    outbox: StatsOutbox,
    player_stats: PlayerStats,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    events_rx: mpsc::UnboundedReceiver<DriverEvent>,
}

impl<C> GameDriver<C>
where
    C: ChainGateway + Clone + Send + Sync + 'static,
{
    pub fn new(session: Session, chain: C, outbox: StatsOutbox) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            session,
            chain,
            outbox,
            player_stats: PlayerStats::default(),
            events_tx,
            events_rx,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn player_stats(&self) -> &PlayerStats {
        &self.player_stats
    }

    pub fn outbox(&self) -> &StatsOutbox {
        &self.outbox
    }

    /// Steps the session with a player action and starts whatever it asks for.
    pub fn dispatch(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        let effects = self.session.step(event)?;
        for effect in effects {
            self.execute(effect);
        }
        Ok(())
    }

    /// Next completion from a task started by this driver.
    pub async fn next_event(&mut self) -> Option<DriverEvent> {
        self.events_rx.recv().await
    }

    pub fn handle(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Session(event) => {
                if let Err(err) = self.dispatch(event) {
                    error!(%err, "completion rejected by session");
                }
            }
            DriverEvent::PlayerStats(stats) => self.player_stats = stats,
            DriverEvent::MinBet(min_wei) => {
                if let Err(err) = self.dispatch(SessionEvent::MinBetLoaded(min_wei)) {
                    error!(%err, "minBet rejected by session");
                }
            }
        }
    }

    pub fn load_min_bet(&self) {
        let chain = self.chain.clone();
        self.spawn_optional(async move {
            match chain.min_bet().await {
                Ok(min_wei) => Some(DriverEvent::MinBet(min_wei)),
                Err(err) => {
                    warn!(%err, "minBet unavailable; keeping default bounds");
                    None
                }
            }
        });
    }

    pub fn refresh_player_stats(&self) {
        let chain = self.chain.clone();
        let player = self.session.wallet();
        self.spawn_optional(async move {
            match chain.player_stats(player).await {
                Ok(stats) => Some(DriverEvent::PlayerStats(stats)),
                Err(err) => {
                    warn!(%err, "failed to refresh player stats");
                    None
                }
            }
        });
    }

    fn execute(&mut self, effect: Effect) {
        let chain = self.chain.clone();
        match effect {
            Effect::SubmitFlip {
                round,
                side,
                bet_wei,
            } => self.spawn_session(async move {
                match chain.submit_flip(side, bet_wei).await {
                    Ok(transaction_id) => SessionEvent::TransactionObserved {
                        round,
                        transaction_id,
                    },
                    Err(error) => SessionEvent::SubmissionFailed { round, error },
                }
            }),
            Effect::AwaitConfirmation { transaction_id } => self.spawn_session(async move {
                match chain.await_confirmation(transaction_id).await {
                    Ok(Confirmation::Mined { .. }) => SessionEvent::Confirmed { transaction_id },
                    Ok(Confirmation::Reverted) => SessionEvent::ConfirmationFailed {
                        transaction_id,
                        error: ChainError::Reverted(transaction_id),
                    },
                    Err(error) => SessionEvent::ConfirmationFailed {
                        transaction_id,
                        error,
                    },
                }
            }),
            Effect::FetchReceipt { transaction_id } => self.spawn_session(async move {
                match chain.fetch_receipt(transaction_id).await {
                    Ok(receipt) => SessionEvent::ReceiptDecoded {
                        transaction_id,
                        event: decode_game_event(&receipt),
                    },
                    Err(error) => SessionEvent::ReceiptFailed {
                        transaction_id,
                        error,
                    },
                }
            }),
            Effect::StartReveal {
                transaction_id,
                delay,
            } => self.spawn_session(async move {
                time::sleep(delay).await;
                SessionEvent::RevealElapsed { transaction_id }
            }),
            Effect::RefreshPlayerStats => self.refresh_player_stats(),
            Effect::RecordGame(record) => {
                self.outbox.enqueue(record);
            }
            Effect::ReleaseResetGuard { generation, after } => {
                self.spawn_session(async move {
                    time::sleep(after).await;
                    SessionEvent::ResetGuardElapsed { generation }
                })
            }
        }
    }

    fn spawn_session<F>(&self, task: F)
    where
        F: Future<Output = SessionEvent> + Send + 'static,
    {
        self.spawn_optional(async move { Some(DriverEvent::Session(task.await)) });
    }

    fn spawn_optional<F>(&self, task: F)
    where
        F: Future<Output = Option<DriverEvent>> + Send + 'static,
    {
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            if let Some(event) = task.await {
                let _ = events_tx.send(event);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        chain::GameReceipt,
        session::{
            CoinSide,
            RevealPhase,
        },
        stats::{
            StatsCommand,
            StatsGateway,
            fakes::FakeStatsStore,
            stats_worker,
        },
    };
    use alloy::primitives::{
        Address,
        Log,
        TxHash,
    };
    use generated_abi::test_helpers::{
        game_played_log,
        unrelated_log,
    };
    use std::{
        sync::{
            Arc,
            Mutex,
        },
        time::Duration,
    };

    const PLAYER: Address = Address::repeat_byte(0xAA);
    const STRANGER: Address = Address::repeat_byte(0xBB);
    const TX: TxHash = TxHash::repeat_byte(0x42);

    #[derive(Clone)]
    struct FakeChain {
        submit_error: Option<ChainError>,
        confirmation: Result<Confirmation, ChainError>,
        logs: Vec<Log>,
        submitted: Arc<Mutex<Vec<(CoinSide, U256)>>>,
    }

    impl FakeChain {
        fn settling(logs: Vec<Log>) -> Self {
            Self {
                submit_error: None,
                confirmation: Ok(Confirmation::Mined {
                    block_number: Some(1),
                }),
                logs,
                submitted: Arc::default(),
            }
        }

        fn submitted(&self) -> Vec<(CoinSide, U256)> {
            self.submitted.lock().unwrap().clone()
        }
    }

    impl ChainGateway for FakeChain {
        async fn min_bet(&self) -> Result<U256, ChainError> {
            Ok(U256::from(1_000_000_000_000_000u64))
        }

        async fn player_stats(
            &self,
            player: Option<Address>,
        ) -> Result<PlayerStats, ChainError> {
            Ok(match player {
                Some(_) => PlayerStats {
                    total_bets: U256::from(self.submitted().len()),
                    ..PlayerStats::default()
                },
                None => PlayerStats::default(),
            })
        }

        async fn submit_flip(
            &self,
            side: CoinSide,
            bet_wei: U256,
        ) -> Result<TxHash, ChainError> {
            if let Some(err) = &self.submit_error {
                return Err(err.clone());
            }
            self.submitted.lock().unwrap().push((side, bet_wei));
            Ok(TX)
        }

        async fn await_confirmation(
            &self,
            _transaction_id: TxHash,
        ) -> Result<Confirmation, ChainError> {
            time::sleep(Duration::from_millis(500)).await;
            self.confirmation.clone()
        }

        async fn fetch_receipt(&self, transaction_id: TxHash) -> Result<GameReceipt, ChainError> {
            Ok(GameReceipt {
                transaction_id,
                block_number: Some(1),
                succeeded: true,
                logs: self.logs.clone(),
            })
        }
    }

    fn driver_with(
        chain: FakeChain,
    ) -> (
        GameDriver<FakeChain>,
        mpsc::UnboundedReceiver<StatsCommand>,
    ) {
        let (stats_tx, stats_rx) = mpsc::unbounded_channel();
        let mut driver = GameDriver::new(Session::default(), chain, StatsOutbox::new(stats_tx));
        driver
            .dispatch(SessionEvent::WalletChanged(Some(PLAYER)))
            .unwrap();
        (driver, stats_rx)
    }

    async fn run_until(
        driver: &mut GameDriver<FakeChain>,
        reached: impl Fn(&GameDriver<FakeChain>) -> bool,
    ) {
        for _ in 0..32 {
            if reached(driver) {
                return;
            }
            let event = driver.next_event().await.unwrap();
            driver.handle(event);
        }
        panic!("stuck in {:?}", driver.session().phase());
    }

    fn start_round(driver: &mut GameDriver<FakeChain>, side: CoinSide) {
        driver.dispatch(SessionEvent::SideChosen(side)).unwrap();
        driver.dispatch(SessionEvent::SubmitRequested).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn winning_round__reveals_and_records_once() {
        // given
        let bet = U256::from(5_000_000_000_000_000u64);
        let chain = FakeChain::settling(vec![unrelated_log(), game_played_log(PLAYER, bet, true)]);
        let (mut driver, mut stats_rx) = driver_with(chain.clone());

        // when
        start_round(&mut driver, CoinSide::Heads);
        run_until(&mut driver, |d| d.session().phase() == RevealPhase::Revealing).await;
        let revealed_at = time::Instant::now();
        run_until(&mut driver, |d| d.session().phase() == RevealPhase::Done).await;
        run_until(&mut driver, |d| d.player_stats().total_bets == U256::from(1u64)).await;

        // then
        assert!(revealed_at.elapsed() >= Duration::from_secs(3));
        assert_eq!(chain.submitted(), vec![(CoinSide::Heads, bet)]);
        let session = driver.session();
        assert_eq!(session.result(), Some(CoinSide::Heads));
        assert_eq!(session.win_amount(), Some("0.0095"));
        assert!(session.result_modal_open());
        let Ok(StatsCommand::Record(record)) = stats_rx.try_recv() else {
            panic!("expected a game record");
        };
        assert_eq!(record.transaction_hash, TX.to_string());
        assert!(record.won);
        assert!(stats_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn losing_round__shows_opposite_face_without_winnings() {
        // given
        let chain = FakeChain::settling(vec![game_played_log(PLAYER, U256::from(1u64), false)]);
        let (mut driver, _stats_rx) = driver_with(chain);

        // when
        start_round(&mut driver, CoinSide::Tails);
        run_until(&mut driver, |d| d.session().phase() == RevealPhase::Done).await;

        // then
        assert_eq!(driver.session().result(), Some(CoinSide::Heads));
        assert_eq!(driver.session().win_amount(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn wallet_rejection__returns_to_idle() {
        // given
        let mut chain = FakeChain::settling(Vec::new());
        chain.submit_error = Some(ChainError::UserRejected);
        let (mut driver, _stats_rx) = driver_with(chain);
        driver
            .dispatch(SessionEvent::PresetChosen(2))
            .unwrap();

        // when
        start_round(&mut driver, CoinSide::Heads);
        run_until(&mut driver, |d| d.session().phase() == RevealPhase::Idle).await;

        // then
        let session = driver.session();
        assert_eq!(session.chosen_side(), None);
        assert_eq!(session.bet_amount(), crate::bet::DEFAULT_BET);
        assert_eq!(session.active_tx(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_transaction__aborts_round() {
        // given
        let mut chain = FakeChain::settling(Vec::new());
        chain.confirmation = Ok(Confirmation::Reverted);
        let (mut driver, mut stats_rx) = driver_with(chain);

        // when
        start_round(&mut driver, CoinSide::Heads);
        run_until(&mut driver, |d| d.session().active_tx().is_some()).await;
        run_until(&mut driver, |d| d.session().phase() == RevealPhase::Idle).await;

        // then
        assert!(!driver.session().game_started());
        assert!(stats_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_player_event__stalls_until_reset() {
        // given
        let chain =
            FakeChain::settling(vec![game_played_log(STRANGER, U256::from(1u64), true)]);
        let (mut driver, _stats_rx) = driver_with(chain);

        // when
        start_round(&mut driver, CoinSide::Heads);
        run_until(&mut driver, |d| d.session().anomaly().is_some()).await;

        // then
        assert_eq!(driver.session().phase(), RevealPhase::Confirming);
        assert_eq!(driver.session().result(), None);
        driver.dispatch(SessionEvent::ResetRequested).unwrap();
        assert_eq!(driver.session().phase(), RevealPhase::Idle);
        assert!(driver.session().anomaly().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_without_game_event__stalls() {
        // given
        let chain = FakeChain::settling(vec![unrelated_log()]);
        let (mut driver, _stats_rx) = driver_with(chain);

        // when
        start_round(&mut driver, CoinSide::Tails);
        run_until(&mut driver, |d| d.session().anomaly().is_some()).await;

        // then
        assert!(driver.session().game_started());
        assert_eq!(driver.session().phase(), RevealPhase::Confirming);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_failure__does_not_disturb_finished_round() {
        // given
        let chain = FakeChain::settling(vec![game_played_log(PLAYER, U256::from(1u64), true)]);
        let (stats_tx, stats_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, mut snapshot_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(stats_worker(
            StatsGateway::new(FakeStatsStore::failing()),
            Some(PLAYER.to_checksum(None)),
            Duration::from_secs(3600),
            stats_rx,
            snapshot_tx,
        ));
        let mut driver =
            GameDriver::new(Session::default(), chain, StatsOutbox::new(stats_tx));
        driver
            .dispatch(SessionEvent::WalletChanged(Some(PLAYER)))
            .unwrap();
        let _ = snapshot_rx.recv().await;

        // when
        start_round(&mut driver, CoinSide::Heads);
        run_until(&mut driver, |d| d.session().phase() == RevealPhase::Done).await;
        let after_record = snapshot_rx.recv().await.unwrap();

        // then
        assert_eq!(after_record.player.unwrap_or_default().total_games, 0);
        assert_eq!(driver.session().phase(), RevealPhase::Done);
        assert_eq!(driver.session().result(), Some(CoinSide::Heads));
        driver.outbox().shutdown();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn load_min_bet__raises_lower_bound() {
        // given
        let (mut driver, _stats_rx) = driver_with(FakeChain::settling(Vec::new()));

        // when
        driver.load_min_bet();
        let event = driver.next_event().await.unwrap();
        driver.handle(event);

        // then
        assert_eq!(driver.session().bounds().min(), "0.001");
    }
}
