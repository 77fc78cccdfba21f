//! Bet amount entry, bounds and the display-only payout figure.
//!
//! Amounts are decimal strings denominated in the chain's native token and
//! converted to base units (18 decimals) before they reach the contract.

use alloy::primitives::{
    U256,
    utils::{
        format_ether,
        parse_ether,
    },
};

pub const DEFAULT_BET: &str = "0.005";
pub const DEFAULT_MAX_BET: &str = "0.1";
pub const PRESET_AMOUNTS: [&str; 3] = ["0.005", "0.05", "0.1"];

const PAYOUT_NUMERATOR: u64 = 19;
const PAYOUT_DENOMINATOR: u64 = 10;
const PAYOUT_DECIMALS: u32 = 4;
const NATIVE_DECIMALS: u32 = 18;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BetError {
    #[error("no bet amount entered")]
    Empty,
    #[error("'{0}' is not a valid amount")]
    Invalid(String),
    #[error("{amount} is below the minimum bet of {min}")]
    BelowMinimum { amount: String, min: String },
    #[error("{amount} is above the maximum bet of {max}")]
    AboveMaximum { amount: String, max: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BetBounds {
    min: String,
    max: String,
    min_wei: U256,
    max_wei: U256,
}

impl Default for BetBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_BET.to_string(),
            max: DEFAULT_MAX_BET.to_string(),
            min_wei: U256::from(5_000_000_000_000_000u64),
            max_wei: U256::from(100_000_000_000_000_000u64),
        }
    }
}

impl BetBounds {
    pub fn new(min: &str, max: &str) -> Result<Self, BetError> {
        Ok(Self {
            min: min.to_string(),
            max: max.to_string(),
            min_wei: to_wei(min)?,
            max_wei: to_wei(max)?,
        })
    }

    /// Replaces the lower bound with the contract's `minBet`.
    pub fn with_min_wei(mut self, min_wei: U256) -> Self {
        self.min = format_amount(min_wei);
        self.min_wei = min_wei;
        self
    }

    pub fn min(&self) -> &str {
        &self.min
    }

    pub fn max(&self) -> &str {
        &self.max
    }

    pub fn check(&self, amount: &str) -> Result<U256, BetError> {
        let wei = to_wei(amount)?;
        if wei < self.min_wei {
            return Err(BetError::BelowMinimum {
                amount: amount.to_string(),
                min: self.min.clone(),
            });
        }
        if wei > self.max_wei {
            return Err(BetError::AboveMaximum {
                amount: amount.to_string(),
                max: self.max.clone(),
            });
        }
        Ok(wei)
    }
}

pub fn to_wei(amount: &str) -> Result<U256, BetError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(BetError::Empty);
    }
    let well_formed = trimmed.chars().all(|c| c.is_ascii_digit() || c == '.')
        && trimmed.chars().filter(|c| *c == '.').count() <= 1
        && trimmed.chars().any(|c| c.is_ascii_digit());
    if !well_formed {
        return Err(BetError::Invalid(amount.to_string()));
    }
    parse_ether(trimmed).map_err(|_| BetError::Invalid(amount.to_string()))
}

/// Native amount without trailing zeros, e.g. `0.005`.
pub fn format_amount(wei: U256) -> String {
    let formatted = format_ether(wei);
    if !formatted.contains('.') {
        return formatted;
    }
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Native amount rounded half-up to `decimals` places.
pub fn format_rounded(wei: U256, decimals: u32) -> String {
    let decimals = decimals.min(NATIVE_DECIMALS);
    let unit = U256::from(10u64).pow(U256::from(NATIVE_DECIMALS - decimals));
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let rounded = (wei + unit / U256::from(2u64)) / unit;
    let whole = rounded / scale;
    if decimals == 0 {
        return whole.to_string();
    }
    let fraction = (rounded % scale).to::<u64>();
    format!("{whole}.{fraction:0width$}", width = decimals as usize)
}

/// Winnings shown to the player: `bet × 1.9`, four decimals. The contract's
/// transfer is authoritative; this figure is never sent anywhere but the screen.
pub fn payout_display(amount: &str) -> Result<String, BetError> {
    let wei = to_wei(amount)?;
    let payout = wei * U256::from(PAYOUT_NUMERATOR) / U256::from(PAYOUT_DENOMINATOR);
    Ok(format_rounded(payout, PAYOUT_DECIMALS))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn payout_display__applies_multiplier_with_four_decimals() {
        assert_eq!(payout_display("0.005").unwrap(), "0.0095");
        assert_eq!(payout_display("0.05").unwrap(), "0.0950");
        assert_eq!(payout_display("0.1").unwrap(), "0.1900");
    }

    #[test]
    fn payout_display__rounds_half_up() {
        // 0.00123 * 1.9 = 0.002337
        assert_eq!(payout_display("0.00123").unwrap(), "0.0023");
        // 0.00125 * 1.9 = 0.002375
        assert_eq!(payout_display("0.00125").unwrap(), "0.0024");
    }

    #[test]
    fn check__rejects_amounts_outside_bounds() {
        // given
        let bounds = BetBounds::default();

        // when
        let below = bounds.check("0.001");
        let above = bounds.check("0.2");
        let inside = bounds.check("0.02");

        // then
        assert!(matches!(below, Err(BetError::BelowMinimum { .. })));
        assert!(matches!(above, Err(BetError::AboveMaximum { .. })));
        assert_eq!(inside.unwrap(), U256::from(20_000_000_000_000_000u64));
    }

    #[test]
    fn check__accepts_both_edges() {
        let bounds = BetBounds::default();
        assert!(bounds.check(DEFAULT_BET).is_ok());
        assert!(bounds.check(DEFAULT_MAX_BET).is_ok());
    }

    #[test]
    fn to_wei__rejects_garbage() {
        assert_eq!(to_wei(""), Err(BetError::Empty));
        assert!(matches!(to_wei("-1"), Err(BetError::Invalid(_))));
        assert!(matches!(to_wei("1.2.3"), Err(BetError::Invalid(_))));
        assert!(matches!(to_wei("."), Err(BetError::Invalid(_))));
        assert!(matches!(to_wei("0x10"), Err(BetError::Invalid(_))));
    }

    #[test]
    fn with_min_wei__replaces_lower_bound_label() {
        // given
        let bounds = BetBounds::default();

        // when
        let raised = bounds.with_min_wei(U256::from(10_000_000_000_000_000u64));

        // then
        assert_eq!(raised.min(), "0.01");
        assert!(raised.check("0.005").is_err());
    }

    #[test]
    fn format_amount__trims_trailing_zeros() {
        assert_eq!(format_amount(U256::from(5_000_000_000_000_000u64)), "0.005");
        assert_eq!(format_amount(U256::from(2_000_000_000_000_000_000u128)), "2");
    }

    proptest! {
        #[test]
        fn presets__always_fit_default_bounds(index in 0usize..PRESET_AMOUNTS.len()) {
            prop_assert!(BetBounds::default().check(PRESET_AMOUNTS[index]).is_ok());
        }

        #[test]
        fn format_rounded__stays_within_half_unit(milli in 0u64..1_000_000u64) {
            let wei = U256::from(milli) * U256::from(1_000_000_000_000_000u64);
            let shown = format_rounded(wei, 4);
            prop_assert_eq!(to_wei(&shown).unwrap(), wei);
        }
    }
}
