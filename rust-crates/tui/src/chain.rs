//! Everything the game needs from the chain, behind [`ChainGateway`].
//!
//! The production implementation talks JSON-RPC through alloy; the driver
//! tests swap in an in-memory fake.

use alloy::{
    primitives::{
        Address,
        Log,
        TxHash,
        U256,
    },
    sol_types::SolEvent,
};
use generated_abi::coinflip_types::CoinFlip::GamePlayed;
use std::{
    future::Future,
    time::Duration,
};

use crate::session::CoinSide;

pub mod alloy_gateway;

pub use alloy_gateway::AlloyChainGateway;

/// EIP-1193 "user rejected the request".
pub const USER_REJECTED_CODE: i64 = 4001;
pub const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("transaction was rejected in the wallet")]
    UserRejected,
    #[error("transaction submission failed: {0}")]
    Submission(String),
    #[error("rpc unreachable: {0}")]
    Connectivity(String),
    #[error("transaction {transaction_id} not confirmed after {waited:?}")]
    ConfirmationTimeout {
        transaction_id: TxHash,
        waited: Duration,
    },
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    #[error("receipt for {0} is not available")]
    ReceiptUnavailable(TxHash),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Mined { block_number: Option<u64> },
    Reverted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameReceipt {
    pub transaction_id: TxHash,
    pub block_number: Option<u64>,
    pub succeeded: bool,
    pub logs: Vec<Log>,
}

/// Decoded `GamePlayed(player, bet, didWin)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameEvent {
    pub player: Address,
    pub bet_wei: U256,
    pub did_win: bool,
}

/// Contract-side lifetime totals for one player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayerStats {
    pub total_bets: U256,
    pub total_wins: U256,
    pub total_losses: U256,
    /// Basis points, 10_000 = 100%.
    pub win_rate_bps: U256,
    pub total_wagered: U256,
    pub total_won: U256,
    pub total_lost: U256,
    pub best_win_streak: U256,
}

impl PlayerStats {
    pub fn win_rate_percent(&self) -> String {
        let bps = self.win_rate_bps.saturating_to::<u64>();
        format!("{}.{:02}%", bps / 100, bps % 100)
    }
}

pub trait ChainGateway {
    fn min_bet(&self) -> impl Future<Output = Result<U256, ChainError>> + Send;

    /// Zeroed stats when no player is connected.
    fn player_stats(
        &self,
        player: Option<Address>,
    ) -> impl Future<Output = Result<PlayerStats, ChainError>> + Send;

    /// Sends `flip(side == Heads)` with `bet_wei` attached and resolves once
    /// the transaction hash is known.
    fn submit_flip(
        &self,
        side: CoinSide,
        bet_wei: U256,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    fn await_confirmation(
        &self,
        transaction_id: TxHash,
    ) -> impl Future<Output = Result<Confirmation, ChainError>> + Send;

    fn fetch_receipt(
        &self,
        transaction_id: TxHash,
    ) -> impl Future<Output = Result<GameReceipt, ChainError>> + Send;
}

/// First log in `receipt` that decodes as `GamePlayed`. Logs are matched by
/// event signature only; the emitting address is not checked.
pub fn decode_game_event(receipt: &GameReceipt) -> Option<GameEvent> {
    receipt
        .logs
        .iter()
        .filter(|log| log.topics().first() == Some(&GamePlayed::SIGNATURE_HASH))
        .find_map(|log| GamePlayed::decode_log_data(&log.data).ok())
        .map(|event| GameEvent {
            player: event.player,
            bet_wei: event.bet,
            did_win: event.didWin,
        })
}

pub fn classify_rpc_failure(code: i64, message: &str) -> ChainError {
    let lowered = message.to_ascii_lowercase();
    if code == USER_REJECTED_CODE
        || lowered.contains("user rejected")
        || lowered.contains("user denied")
    {
        return ChainError::UserRejected;
    }
    ChainError::Submission(format!("{message} (code {code})"))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use generated_abi::test_helpers::{
        game_played_log,
        truncated_game_played_log,
        unrelated_log,
    };

    fn receipt_with(logs: Vec<Log>) -> GameReceipt {
        GameReceipt {
            transaction_id: TxHash::repeat_byte(0x01),
            block_number: Some(7),
            succeeded: true,
            logs,
        }
    }

    #[test]
    fn decode_game_event__finds_event_among_unrelated_logs() {
        // given
        let player = Address::repeat_byte(0xAA);
        let bet = U256::from(5_000_000_000_000_000u64);
        let receipt = receipt_with(vec![
            unrelated_log(),
            game_played_log(player, bet, true),
        ]);

        // when
        let event = decode_game_event(&receipt);

        // then
        assert_eq!(
            event,
            Some(GameEvent {
                player,
                bet_wei: bet,
                did_win: true,
            })
        );
    }

    #[test]
    fn decode_game_event__returns_first_of_several_matches() {
        // given
        let first = Address::repeat_byte(0x01);
        let second = Address::repeat_byte(0x02);
        let receipt = receipt_with(vec![
            game_played_log(first, U256::from(1u64), false),
            game_played_log(second, U256::from(2u64), true),
        ]);

        // when
        let event = decode_game_event(&receipt).unwrap();

        // then
        assert_eq!(event.player, first);
        assert!(!event.did_win);
    }

    #[test]
    fn decode_game_event__skips_logs_that_fail_to_decode() {
        // given
        let player = Address::repeat_byte(0x0B);
        let receipt = receipt_with(vec![
            truncated_game_played_log(player),
            game_played_log(player, U256::from(3u64), false),
        ]);

        // when
        let event = decode_game_event(&receipt).unwrap();

        // then
        assert_eq!(event.bet_wei, U256::from(3u64));
    }

    #[test]
    fn decode_game_event__none_without_matching_log() {
        assert_eq!(decode_game_event(&receipt_with(vec![unrelated_log()])), None);
        assert_eq!(decode_game_event(&receipt_with(Vec::new())), None);
    }

    #[test]
    fn classify_rpc_failure__recognises_wallet_rejection() {
        assert_eq!(
            classify_rpc_failure(USER_REJECTED_CODE, "whatever"),
            ChainError::UserRejected
        );
        assert_eq!(
            classify_rpc_failure(-32000, "User denied transaction signature"),
            ChainError::UserRejected
        );
        assert!(matches!(
            classify_rpc_failure(-32000, "insufficient funds"),
            ChainError::Submission(_)
        ));
    }

    #[test]
    fn win_rate_percent__formats_basis_points() {
        let stats = PlayerStats {
            win_rate_bps: U256::from(4_567u64),
            ..PlayerStats::default()
        };
        assert_eq!(stats.win_rate_percent(), "45.67%");
        assert_eq!(PlayerStats::default().win_rate_percent(), "0.00%");
    }
}
