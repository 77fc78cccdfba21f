pub use generated_abi::{
    CoinFlipInstance,
    coinflip_types,
    contract_instance,
};

pub mod bet;
pub mod chain;
pub mod driver;
pub mod session;
pub mod stats;
pub mod wallets;

#[cfg(feature = "test-helpers")]
pub use generated_abi::test_helpers;
