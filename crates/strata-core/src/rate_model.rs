//! Dynamic fixed rate as a step function of the buffer ratio.
//!
//! | buffer ratio | rate            |
//! |--------------|-----------------|
//! | >= 20%       | 100% of base    |
//! | >= 15%       | 90% of base     |
//! | >= 10%       | 80% of base     |
//! | >= 5%        | 60% of base     |
//! | below        | min rate        |
//!
//! Every result is clamped into `[min_rate, max_rate]`.

use crate::config::DistributionConfig;
use crate::math::{buffer_ratio, floor_bps};
use crate::types::Bps;
use crate::{Result, StrataError};

/// `(ratio lower bound, share of base rate)`, both in bps, highest bound first.
const RATE_STEPS: [(u64, u64); 4] = [(2_000, 10_000), (1_500, 9_000), (1_000, 8_000), (500, 6_000)];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateModel {
    base_rate: Bps,
    min_rate: Bps,
    max_rate: Bps,
}

impl RateModel {
    pub fn new(base_rate: Bps, min_rate: Bps, max_rate: Bps) -> Result<Self> {
        if !(min_rate <= base_rate && base_rate <= max_rate) {
            return Err(StrataError::ConfigError(format!(
                "rate model requires min <= base <= max (got {min_rate} / {base_rate} / {max_rate})"
            )));
        }
        Ok(Self {
            base_rate,
            min_rate,
            max_rate,
        })
    }

    pub fn from_config(config: &DistributionConfig) -> Result<Self> {
        Self::new(config.base_rate, config.min_rate, config.max_rate)
    }

    pub fn base_rate(&self) -> Bps {
        self.base_rate
    }

    pub fn min_rate(&self) -> Bps {
        self.min_rate
    }

    pub fn max_rate(&self) -> Bps {
        self.max_rate
    }

    /// Rate for the given principals. An empty pool gets the base rate.
    pub fn derive(&self, protected: u64, leveraged: u64) -> Result<Bps> {
        if protected == 0 && leveraged == 0 {
            return Ok(self.clamp(self.base_rate));
        }
        let ratio = buffer_ratio(protected, leveraged)?.as_u64();
        let rate = match RATE_STEPS.iter().find(|(bound, _)| ratio >= *bound) {
            Some(&(_, share)) => {
                let share = Bps::saturating_from_u64(share);
                Bps::saturating_from_u64(floor_bps(self.base_rate.as_u64(), share)?)
            }
            None => self.min_rate,
        };
        Ok(self.clamp(rate))
    }

    pub fn clamp(&self, rate: Bps) -> Bps {
        rate.clamp(self.min_rate, self.max_rate)
    }
}
