//! Priority waterfall for one harvest.
//!
//! Order of claims:
//! 1. protocol fee (profit scenario only, taken before the obligation is computed)
//! 2. protected obligation, funded from distributable profit and then by slashing leveraged principal
//! 3. leveraged residual, only when the protected obligation is fully met in the same call
//!
//! Pure and deterministic: the caller reads principals, calls `distribute`, and applies the result.

use serde::{Deserialize, Serialize};

use crate::math::{add_u64, floor_bps, obligation, sub_u64};
use crate::types::Bps;
use crate::{Result, StrataError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterfallInput {
    pub protected_principal: u64,
    /// What a slash can draw on: leveraged principal plus its retained yield.
    pub leveraged_capacity: u64,
    pub fixed_rate: Bps,
    pub protocol_fee: Bps,
    pub elapsed_secs: u64,
    /// Strategy result since the last harvest; `<= 0` is the loss scenario.
    pub signed_profit: i128,
}

/// Outcome of one waterfall pass.
///
/// Conservation (profit scenario): `protocol_fee + protected_yield + leveraged_yield
/// = profit + leveraged_slash`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionResult {
    pub protocol_fee: u64,
    /// Total owed to the protected tranche for this pass, including the slash-funded part.
    pub protected_yield: u64,
    pub leveraged_yield: u64,
    pub leveraged_slash: u64,
    pub protected_fully_paid: bool,
    /// Obligation computed for the interval (reporting only).
    pub obligation: u64,
    /// Portion of `protected_yield` funded by slashing leveraged principal.
    pub slash_funded_protected: u64,
}

/// Route one harvest's profit or loss through the waterfall.
///
/// Postconditions:
/// - `leveraged_slash <= leveraged_capacity`
/// - `leveraged_yield > 0` implies `protected_fully_paid`
pub fn distribute(input: &WaterfallInput) -> Result<DistributionResult> {
    let owed = obligation(
        input.protected_principal,
        input.fixed_rate,
        input.elapsed_secs,
    )?;
    let leveraged = input.leveraged_capacity;

    if input.signed_profit <= 0 {
        let loss = u64::try_from(input.signed_profit.unsigned_abs()).map_err(|_| {
            StrataError::BoundedValueExceeded(format!(
                "loss out of range: {}",
                input.signed_profit
            ))
        })?;
        let deficit = add_u64(owed, loss)?;
        if leveraged >= deficit {
            return Ok(DistributionResult {
                protocol_fee: 0,
                protected_yield: owed,
                leveraged_yield: 0,
                leveraged_slash: deficit,
                protected_fully_paid: true,
                obligation: owed,
                slash_funded_protected: owed,
            });
        }
        // Whatever the leveraged tranche holds beyond the loss itself goes to protected.
        let salvage = leveraged.saturating_sub(loss);
        return Ok(DistributionResult {
            protocol_fee: 0,
            protected_yield: salvage,
            leveraged_yield: 0,
            leveraged_slash: leveraged,
            protected_fully_paid: false,
            obligation: owed,
            slash_funded_protected: salvage,
        });
    }

    let profit = u64::try_from(input.signed_profit).map_err(|_| {
        StrataError::BoundedValueExceeded(format!("profit out of range: {}", input.signed_profit))
    })?;
    let fee = floor_bps(profit, input.protocol_fee)?;
    let distributable = sub_u64(profit, fee)?;

    if distributable >= owed {
        return Ok(DistributionResult {
            protocol_fee: fee,
            protected_yield: owed,
            leveraged_yield: distributable - owed,
            leveraged_slash: 0,
            protected_fully_paid: true,
            obligation: owed,
            slash_funded_protected: 0,
        });
    }

    let deficit = owed - distributable;
    if leveraged >= deficit {
        Ok(DistributionResult {
            protocol_fee: fee,
            protected_yield: owed,
            leveraged_yield: 0,
            leveraged_slash: deficit,
            protected_fully_paid: true,
            obligation: owed,
            slash_funded_protected: deficit,
        })
    } else {
        Ok(DistributionResult {
            protocol_fee: fee,
            protected_yield: add_u64(distributable, leveraged)?,
            leveraged_yield: 0,
            leveraged_slash: leveraged,
            protected_fully_paid: false,
            obligation: owed,
            slash_funded_protected: leveraged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{SECONDS_PER_DAY, SECONDS_PER_YEAR};
    use proptest::prelude::*;

    fn input(protected: u64, leveraged: u64, elapsed: u64, profit: i128) -> WaterfallInput {
        WaterfallInput {
            protected_principal: protected,
            leveraged_capacity: leveraged,
            fixed_rate: Bps::new(500).unwrap(),
            protocol_fee: Bps::new(100).unwrap(),
            elapsed_secs: elapsed,
            signed_profit: profit,
        }
    }

    #[test]
    fn surplus_pays_fee_then_obligation_then_residual() {
        let r = distribute(&input(80_000, 20_000, SECONDS_PER_YEAR, 10_000)).unwrap();
        assert_eq!(r.protocol_fee, 100);
        assert_eq!(r.protected_yield, 4_000);
        assert_eq!(r.leveraged_yield, 5_900);
        assert_eq!(r.leveraged_slash, 0);
        assert!(r.protected_fully_paid);
    }

    #[test]
    fn loss_beyond_leveraged_principal_wipes_it_and_pays_nothing() {
        let r = distribute(&input(80_000, 5_000, SECONDS_PER_DAY, -6_000)).unwrap();
        assert_eq!(r.obligation, 10);
        assert_eq!(r.protected_yield, 0);
        assert_eq!(r.leveraged_slash, 5_000);
        assert_eq!(r.leveraged_yield, 0);
        assert_eq!(r.protocol_fee, 0);
        assert!(!r.protected_fully_paid);
    }

    #[test]
    fn covered_loss_slashes_loss_plus_obligation() {
        let r = distribute(&input(80_000, 20_000, SECONDS_PER_DAY, -1_000)).unwrap();
        assert_eq!(r.protected_yield, 10);
        assert_eq!(r.leveraged_slash, 1_010);
        assert!(r.protected_fully_paid);
    }

    #[test]
    fn partially_covered_loss_salvages_leveraged_remainder() {
        // obligation 10, loss 4_995 -> deficit 5_005 > 5_000; salvage 5_000 - 4_995 = 5.
        let r = distribute(&input(80_000, 5_000, SECONDS_PER_DAY, -4_995)).unwrap();
        assert_eq!(r.protected_yield, 5);
        assert_eq!(r.leveraged_slash, 5_000);
        assert!(!r.protected_fully_paid);
    }

    #[test]
    fn thin_profit_is_topped_up_from_leveraged_principal() {
        let r = distribute(&input(80_000, 20_000, SECONDS_PER_YEAR, 1_000)).unwrap();
        assert_eq!(r.protocol_fee, 10);
        assert_eq!(r.protected_yield, 4_000);
        assert_eq!(r.leveraged_slash, 3_010);
        assert_eq!(r.slash_funded_protected, 3_010);
        assert_eq!(r.leveraged_yield, 0);
        assert!(r.protected_fully_paid);
    }

    #[test]
    fn thin_profit_without_cover_pays_everything_available() {
        let r = distribute(&input(80_000, 1_000, SECONDS_PER_YEAR, 1_000)).unwrap();
        assert_eq!(r.protected_yield, 990 + 1_000);
        assert_eq!(r.leveraged_slash, 1_000);
        assert!(!r.protected_fully_paid);
    }

    #[test]
    fn zero_elapsed_has_zero_obligation() {
        let r = distribute(&input(80_000, 20_000, 0, 500)).unwrap();
        assert_eq!(r.obligation, 0);
        assert_eq!(r.protected_yield, 0);
        assert_eq!(r.leveraged_yield, 495);
    }

    #[test]
    fn zero_profit_is_the_loss_branch() {
        let r = distribute(&input(80_000, 20_000, SECONDS_PER_YEAR, 0)).unwrap();
        assert_eq!(r.protected_yield, 4_000);
        assert_eq!(r.leveraged_slash, 4_000);
        assert!(r.protected_fully_paid);
    }

    #[test]
    fn out_of_range_profit_is_rejected() {
        let r = distribute(&input(1, 1, 1, i128::from(u64::MAX) + 1));
        assert!(matches!(r, Err(StrataError::BoundedValueExceeded(_))));
    }

    proptest! {
        #[test]
        fn no_value_from_nothing_and_slash_bounded(
            protected in 0u64..10_000_000_000u64,
            leveraged in 0u64..10_000_000_000u64,
            rate in 0u16..=10_000u16,
            fee in 0u16..=2_000u16,
            elapsed in 0u64..(2 * SECONDS_PER_YEAR),
            profit in -10_000_000_000i128..10_000_000_000i128,
        ) {
            let inp = WaterfallInput {
                protected_principal: protected,
                leveraged_capacity: leveraged,
                fixed_rate: Bps::new(rate).unwrap(),
                protocol_fee: Bps::new(fee).unwrap(),
                elapsed_secs: elapsed,
                signed_profit: profit,
            };
            let r = distribute(&inp).unwrap();
            prop_assert!(r.leveraged_slash <= leveraged);
            prop_assert!(r.slash_funded_protected <= r.protected_yield);
            if r.leveraged_yield > 0 {
                prop_assert!(r.protected_fully_paid);
            }
            if profit > 0 && r.leveraged_slash == 0 {
                let paid = r.protected_yield as i128 + r.leveraged_yield as i128 + r.protocol_fee as i128;
                prop_assert!(paid <= profit);
            }
            if profit > 0 {
                let paid = r.protected_yield as u128 + r.leveraged_yield as u128 + r.protocol_fee as u128;
                prop_assert_eq!(paid, profit as u128 + r.leveraged_slash as u128);
            }
        }
    }
}
