use alloy::{
    primitives::Address,
    providers::Provider,
};

pub mod coinflip_types {
    use alloy::sol;

    sol! {
        #[sol(rpc)]
        interface CoinFlip {
            function flip(bool choiceIsHeads) external payable returns (bool);

            function minBet() external view returns (uint256);

            function getPlayerStats(address player) external view returns (
                uint256 totalBets,
                uint256 totalWins,
                uint256 totalLosses,
                uint256 winRate,
                uint256 totalWagered,
                uint256 totalWon,
                uint256 totalLost,
                uint256 bestWinStreak
            );

            event GamePlayed(address indexed player, uint256 bet, bool didWin);
        }
    }
}

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub type CoinFlipInstance<P> = coinflip_types::CoinFlip::CoinFlipInstance<P>;

pub fn contract_instance<P: Provider>(address: Address, provider: P) -> CoinFlipInstance<P> {
    coinflip_types::CoinFlip::new(address, provider)
}
