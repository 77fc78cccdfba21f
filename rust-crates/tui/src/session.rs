//! The game session: one coin flip from side selection to revealed result.
//!
//! [`Session::step`] is the whole transition function. It never performs I/O;
//! anything that has to happen outside the state is returned as an
//! [`Effect`] for the driver to execute, and every completion comes back in as
//! a [`SessionEvent`]. Completions are tagged with the transaction (or the
//! submission round) they belong to, so late signals from an abandoned round
//! can be recognised and dropped.

use alloy::primitives::{
    Address,
    TxHash,
    U256,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    time::Duration,
};
use tracing::{
    debug,
    info,
    warn,
};

use crate::{
    bet::{
        self,
        BetBounds,
        BetError,
        DEFAULT_BET,
        PRESET_AMOUNTS,
    },
    chain::{
        ChainError,
        GameEvent,
    },
    stats::NewGameRecord,
};


pub const REVEAL_DELAY: Duration = Duration::from_secs(3);
pub const RESET_GUARD: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl CoinSide {
    pub fn is_heads(self) -> bool {
        matches!(self, CoinSide::Heads)
    }

    pub fn opposite(self) -> Self {
        match self {
            CoinSide::Heads => CoinSide::Tails,
            CoinSide::Tails => CoinSide::Heads,
        }
    }

    /// The face the coin showed. The contract only reports whether the
    /// player won, so the face is inferred from the player's pick.
    pub fn landed(self, did_win: bool) -> Self {
        if did_win { self } else { self.opposite() }
    }
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSide::Heads => write!(f, "heads"),
            CoinSide::Tails => write!(f, "tails"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RevealPhase {
    #[default]
    Idle,
    AwaitingSignature,
    Confirming,
    Revealing,
    Done,
}

impl RevealPhase {
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            RevealPhase::AwaitingSignature | RevealPhase::Confirming | RevealPhase::Revealing
        )
    }
}

/// A confirmed round that cannot be resolved. The session stays in
/// `Confirming` until the player resets.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionAnomaly {
    #[error("no GamePlayed event in receipt for {transaction_id}")]
    MissingGameEvent { transaction_id: TxHash },
    #[error("GamePlayed for {transaction_id} names {actual}, connected wallet is {expected}")]
    ForeignPlayer {
        transaction_id: TxHash,
        expected: Address,
        actual: Address,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("connect a wallet first")]
    WalletDisconnected,
    #[error("choose heads or tails first")]
    NoSideChosen,
    #[error(transparent)]
    Bet(#[from] BetError),
    #[error("no preset #{0}")]
    UnknownPreset(usize),
    #[error("a round is already in progress")]
    RoundInProgress,
    #[error("the coin is being revealed")]
    RevealInProgress,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    WalletChanged(Option<Address>),
    MinBetLoaded(U256),
    SideChosen(CoinSide),
    PresetChosen(usize),
    BetEntered(String),
    SubmitRequested,
    TransactionObserved {
        round: u64,
        transaction_id: TxHash,
    },
    SubmissionFailed {
        round: u64,
        error: ChainError,
    },
    Confirmed {
        transaction_id: TxHash,
    },
    ConfirmationFailed {
        transaction_id: TxHash,
        error: ChainError,
    },
    ReceiptDecoded {
        transaction_id: TxHash,
        event: Option<GameEvent>,
    },
    ReceiptFailed {
        transaction_id: TxHash,
        error: ChainError,
    },
    RevealElapsed {
        transaction_id: TxHash,
    },
    ResultDismissed,
    ResetRequested,
    ResetGuardElapsed {
        generation: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    SubmitFlip {
        round: u64,
        side: CoinSide,
        bet_wei: U256,
    },
    AwaitConfirmation {
        transaction_id: TxHash,
    },
    FetchReceipt {
        transaction_id: TxHash,
    },
    StartReveal {
        transaction_id: TxHash,
        delay: Duration,
    },
    RefreshPlayerStats,
    RecordGame(NewGameRecord),
    ReleaseResetGuard {
        generation: u64,
        after: Duration,
    },
}

/// Outcome fields that are only ever cleared together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct RoundOutcome {
    phase: RevealPhase,
    stake: Option<String>,
    result: Option<CoinSide>,
    did_win: Option<bool>,
    win_amount: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Session {
    wallet: Option<Address>,
    bounds: BetBounds,
    chosen_side: Option<CoinSide>,
    bet_amount: String,
    pending_tx: Option<TxHash>,
    active_tx: Option<TxHash>,
    game_started: bool,
    outcome: RoundOutcome,
    result_modal_open: bool,
    anomaly: Option<SessionAnomaly>,
    round: u64,
    reset_guard: Option<u64>,
    guard_generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(BetBounds::default())
    }
}

impl Session {
    pub fn new(bounds: BetBounds) -> Self {
        Self {
            wallet: None,
            bounds,
            chosen_side: None,
            bet_amount: DEFAULT_BET.to_string(),
            pending_tx: None,
            active_tx: None,
            game_started: false,
            outcome: RoundOutcome::default(),
            result_modal_open: false,
            anomaly: None,
            round: 0,
            reset_guard: None,
            guard_generation: 0,
        }
    }

    pub fn wallet(&self) -> Option<Address> {
        self.wallet
    }

    pub fn bounds(&self) -> &BetBounds {
        &self.bounds
    }

    pub fn chosen_side(&self) -> Option<CoinSide> {
        self.chosen_side
    }

    pub fn bet_amount(&self) -> &str {
        &self.bet_amount
    }

    pub fn pending_tx(&self) -> Option<TxHash> {
        self.pending_tx
    }

    pub fn active_tx(&self) -> Option<TxHash> {
        self.active_tx
    }

    pub fn game_started(&self) -> bool {
        self.game_started
    }

    pub fn phase(&self) -> RevealPhase {
        self.outcome.phase
    }

    pub fn result(&self) -> Option<CoinSide> {
        self.outcome.result
    }

    pub fn did_win(&self) -> Option<bool> {
        self.outcome.did_win
    }

    /// Amount sent with the current round's flip.
    pub fn stake(&self) -> Option<&str> {
        self.outcome.stake.as_deref()
    }

    pub fn win_amount(&self) -> Option<&str> {
        self.outcome.win_amount.as_deref()
    }

    pub fn result_modal_open(&self) -> bool {
        self.result_modal_open
    }

    pub fn anomaly(&self) -> Option<&SessionAnomaly> {
        self.anomaly.as_ref()
    }

    pub fn reset_guard_active(&self) -> bool {
        self.reset_guard.is_some()
    }

    pub fn payout_preview(&self) -> Option<String> {
        bet::payout_display(&self.bet_amount).ok()
    }

    pub fn can_submit(&self) -> bool {
        !self.outcome.phase.is_in_flight()
            && self.wallet.is_some()
            && self.chosen_side.is_some()
            && self.bounds.check(&self.bet_amount).is_ok()
    }

    pub fn step(&mut self, event: SessionEvent) -> Result<Vec<Effect>, SessionError> {
        match event {
            SessionEvent::WalletChanged(wallet) => {
                if wallet != self.wallet {
                    info!(?wallet, "wallet changed");
                }
                self.wallet = wallet;
                Ok(Vec::new())
            }
            SessionEvent::MinBetLoaded(min_wei) => {
                self.bounds = self.bounds.clone().with_min_wei(min_wei);
                Ok(Vec::new())
            }
            SessionEvent::SideChosen(side) => {
                self.ensure_idle()?;
                self.chosen_side = Some(side);
                Ok(Vec::new())
            }
            SessionEvent::PresetChosen(index) => {
                let amount = PRESET_AMOUNTS
                    .get(index)
                    .ok_or(SessionError::UnknownPreset(index))?;
                self.bet_amount = amount.to_string();
                Ok(Vec::new())
            }
            SessionEvent::BetEntered(amount) => {
                self.enter_bet(amount)?;
                Ok(Vec::new())
            }
            SessionEvent::SubmitRequested => self.submit(),
            SessionEvent::TransactionObserved {
                round,
                transaction_id,
            } => Ok(self.observe_transaction(round, transaction_id)),
            SessionEvent::SubmissionFailed { round, error } => {
                Ok(self.submission_failed(round, error))
            }
            SessionEvent::Confirmed { transaction_id } => Ok(self.confirmed(transaction_id)),
            SessionEvent::ConfirmationFailed {
                transaction_id,
                error,
            } => {
                if self.active_tx != Some(transaction_id)
                    || self.outcome.phase != RevealPhase::Confirming
                    || self.game_started
                {
                    debug!(%transaction_id, %error, "ignoring stale confirmation failure");
                    return Ok(Vec::new());
                }
                warn!(%transaction_id, %error, "confirmation failed; abandoning round");
                Ok(self.full_reset())
            }
            SessionEvent::ReceiptDecoded {
                transaction_id,
                event,
            } => Ok(self.receipt_decoded(transaction_id, event)),
            SessionEvent::ReceiptFailed {
                transaction_id,
                error,
            } => {
                if !self.awaiting_receipt(transaction_id) {
                    debug!(%transaction_id, %error, "ignoring stale receipt failure");
                    return Ok(Vec::new());
                }
                warn!(%transaction_id, %error, "receipt unavailable; abandoning round");
                Ok(self.full_reset())
            }
            SessionEvent::RevealElapsed { transaction_id } => {
                Ok(self.reveal_elapsed(transaction_id))
            }
            SessionEvent::ResultDismissed => {
                self.result_modal_open = false;
                Ok(Vec::new())
            }
            SessionEvent::ResetRequested => {
                if self.outcome.phase == RevealPhase::Revealing {
                    return Err(SessionError::RevealInProgress);
                }
                Ok(self.full_reset())
            }
            SessionEvent::ResetGuardElapsed { generation } => {
                if self.reset_guard == Some(generation) {
                    self.reset_guard = None;
                }
                Ok(Vec::new())
            }
        }
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.outcome.phase.is_in_flight() {
            return Err(SessionError::RoundInProgress);
        }
        Ok(())
    }

    /// Empty input clears the amount; anything else must parse and fit the
    /// bounds or the current amount stays.
    fn enter_bet(&mut self, amount: String) -> Result<(), SessionError> {
        let amount = amount.trim().to_string();
        if !amount.is_empty() {
            self.bounds.check(&amount)?;
        }
        self.bet_amount = amount;
        Ok(())
    }

    fn submit(&mut self) -> Result<Vec<Effect>, SessionError> {
        self.ensure_idle()?;
        if self.wallet.is_none() {
            return Err(SessionError::WalletDisconnected);
        }
        let side = self.chosen_side.ok_or(SessionError::NoSideChosen)?;
        let bet_wei = self.bounds.check(&self.bet_amount)?;

        self.pending_tx = None;
        self.active_tx = None;
        self.game_started = false;
        self.anomaly = None;
        self.result_modal_open = false;
        self.outcome = RoundOutcome {
            phase: RevealPhase::AwaitingSignature,
            stake: Some(self.bet_amount.clone()),
            ..RoundOutcome::default()
        };
        self.round += 1;
        info!(round = self.round, %side, bet = %self.bet_amount, "submitting flip");
        Ok(vec![Effect::SubmitFlip {
            round: self.round,
            side,
            bet_wei,
        }])
    }

    fn observe_transaction(&mut self, round: u64, transaction_id: TxHash) -> Vec<Effect> {
        if round != self.round || self.outcome.phase != RevealPhase::AwaitingSignature {
            debug!(round, %transaction_id, "ignoring transaction from an abandoned round");
            return Vec::new();
        }
        self.pending_tx = Some(transaction_id);
        self.active_tx = Some(transaction_id);
        self.outcome.phase = RevealPhase::Confirming;
        vec![Effect::AwaitConfirmation { transaction_id }]
    }

    fn submission_failed(&mut self, round: u64, error: ChainError) -> Vec<Effect> {
        if round != self.round || self.outcome.phase != RevealPhase::AwaitingSignature {
            debug!(round, %error, "ignoring failure from an abandoned round");
            return Vec::new();
        }
        match error {
            ChainError::UserRejected => info!(round, "flip rejected in wallet"),
            error => warn!(round, %error, "flip submission failed"),
        }
        self.full_reset()
    }

    fn confirmed(&mut self, transaction_id: TxHash) -> Vec<Effect> {
        // The reset guard applies to abandoned transactions only.
        let rejected_because = if self.active_tx != Some(transaction_id) {
            Some(if self.reset_guard.is_some() {
                "reset in progress"
            } else {
                "not the active transaction"
            })
        } else if self.game_started {
            Some("already processed")
        } else if self.chosen_side.is_none() {
            Some("no side chosen")
        } else if self.outcome.phase != RevealPhase::Confirming {
            Some("not confirming")
        } else {
            None
        };
        if let Some(reason) = rejected_because {
            debug!(%transaction_id, reason, "ignoring confirmation");
            return Vec::new();
        }
        self.game_started = true;
        vec![Effect::FetchReceipt { transaction_id }]
    }

    fn awaiting_receipt(&self, transaction_id: TxHash) -> bool {
        self.active_tx == Some(transaction_id)
            && self.game_started
            && self.outcome.phase == RevealPhase::Confirming
            && self.anomaly.is_none()
    }

    fn receipt_decoded(
        &mut self,
        transaction_id: TxHash,
        event: Option<GameEvent>,
    ) -> Vec<Effect> {
        if !self.awaiting_receipt(transaction_id) {
            debug!(%transaction_id, "ignoring receipt for inactive transaction");
            return Vec::new();
        }
        let Some(event) = event else {
            let anomaly = SessionAnomaly::MissingGameEvent { transaction_id };
            warn!(%anomaly, "round stalled");
            self.anomaly = Some(anomaly);
            return Vec::new();
        };
        let (Some(expected), Some(side)) = (self.wallet, self.chosen_side) else {
            debug!(%transaction_id, "wallet or side cleared before receipt arrived");
            return Vec::new();
        };
        if event.player != expected {
            let anomaly = SessionAnomaly::ForeignPlayer {
                transaction_id,
                expected,
                actual: event.player,
            };
            warn!(%anomaly, "round stalled");
            self.anomaly = Some(anomaly);
            return Vec::new();
        }

        let result = side.landed(event.did_win);
        info!(%transaction_id, %result, did_win = event.did_win, "revealing result");
        self.outcome.result = Some(result);
        self.outcome.did_win = Some(event.did_win);
        self.outcome.phase = RevealPhase::Revealing;
        vec![Effect::StartReveal {
            transaction_id,
            delay: REVEAL_DELAY,
        }]
    }

    fn reveal_elapsed(&mut self, transaction_id: TxHash) -> Vec<Effect> {
        if self.active_tx != Some(transaction_id) || self.outcome.phase != RevealPhase::Revealing
        {
            debug!(%transaction_id, "ignoring reveal timer for inactive transaction");
            return Vec::new();
        }
        let (Some(wallet), Some(choice), Some(result), Some(won), Some(stake)) = (
            self.wallet,
            self.chosen_side,
            self.outcome.result,
            self.outcome.did_win,
            self.outcome.stake.clone(),
        ) else {
            debug!(%transaction_id, "round incomplete at reveal");
            return Vec::new();
        };

        if won {
            self.outcome.win_amount = bet::payout_display(&stake).ok();
        }
        self.outcome.phase = RevealPhase::Done;
        self.result_modal_open = true;
        info!(%transaction_id, won, "round complete");

        vec![
            Effect::RefreshPlayerStats,
            Effect::RecordGame(NewGameRecord {
                wallet_address: wallet.to_checksum(None),
                choice,
                result,
                won,
                bet_amount: stake,
                transaction_hash: transaction_id.to_string(),
            }),
        ]
    }

    /// Clears the round in one step and raises the reset guard until the
    /// returned effect releases it.
    fn full_reset(&mut self) -> Vec<Effect> {
        self.chosen_side = None;
        self.bet_amount = DEFAULT_BET.to_string();
        self.pending_tx = None;
        self.active_tx = None;
        self.game_started = false;
        self.outcome = RoundOutcome::default();
        self.result_modal_open = false;
        self.anomaly = None;
        self.guard_generation += 1;
        self.reset_guard = Some(self.guard_generation);
        vec![Effect::ReleaseResetGuard {
            generation: self.guard_generation,
            after: RESET_GUARD,
        }]
    }
}
