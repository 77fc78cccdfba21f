use alloy::{
    primitives::{
        Address,
        B256,
        Bytes,
        Log,
        LogData,
        U256,
    },
    sol_types::SolEvent,
};

use crate::coinflip_types::CoinFlip::GamePlayed;

pub const CONTRACT_ADDRESS: Address = Address::repeat_byte(0xC0);

pub fn game_played_log(player: Address, bet: U256, did_win: bool) -> Log {
    let event = GamePlayed {
        player,
        bet,
        didWin: did_win,
    };
    Log {
        address: CONTRACT_ADDRESS,
        data: event.encode_log_data(),
    }
}

/// Carries the `GamePlayed` topic but a payload too short to decode.
pub fn truncated_game_played_log(player: Address) -> Log {
    let topics = vec![GamePlayed::SIGNATURE_HASH, player.into_word()];
    Log {
        address: CONTRACT_ADDRESS,
        data: LogData::new_unchecked(topics, Bytes::from_static(&[0u8; 7])),
    }
}

pub fn unrelated_log() -> Log {
    let topics = vec![B256::repeat_byte(0xAB)];
    Log {
        address: Address::repeat_byte(0x11),
        data: LogData::new_unchecked(topics, Bytes::new()),
    }
}
