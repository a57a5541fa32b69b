use serde::{Deserialize, Serialize};

use crate::{hash, Hash32, StrataError, Result};

pub const BPS_U16: u16 = 10_000;
pub const BPS_U64: u64 = 10_000;

/// Basis points in `[0, 10_000]` (correct-by-construction).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Bps(u16);

impl Bps {
    pub const ZERO: Bps = Bps(0);
    pub const MAX: Bps = Bps(BPS_U16);

    /// Constructs a bounded bps value.
    ///
    /// Preconditions:
    /// - `v <= 10_000` (else returns an error).
    pub fn new(v: u16) -> Result<Bps> {
        if v <= BPS_U16 {
            Ok(Bps(v))
        } else {
            Err(StrataError::ConfigError(format!(
                "bps out of range: {v} > {BPS_U16}"
            )))
        }
    }

    /// Clamps a computed ratio into range. Used for derived values (ratios are always in range
    /// when computed by `math`, this only guards the type boundary).
    pub fn saturating_from_u64(v: u64) -> Bps {
        Bps(v.min(BPS_U64) as u16)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

impl TryFrom<u16> for Bps {
    type Error = StrataError;
    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        Bps::new(value)
    }
}

impl From<Bps> for u16 {
    fn from(value: Bps) -> u16 {
        value.0
    }
}

impl std::fmt::Display for Bps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

/// Account identifier (content-addressed or externally assigned).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub Hash32);

impl AccountId {
    pub const DOMAIN_V1: &'static [u8] = b"STRATA_ACCOUNT_ID_V1";

    /// Derives a stable identifier from a human-readable label.
    pub fn from_label(label: &str) -> AccountId {
        AccountId(hash::sha256_domain(Self::DOMAIN_V1, &[label.as_bytes()]))
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short prefix is enough to disambiguate in logs.
        write!(f, "acct:{}", &self.0.to_hex()[..12])
    }
}

/// Which tranche an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrancheKind {
    /// Fixed-rate tranche, paid before anything else.
    Protected,
    /// First-loss tranche, receives the residual.
    Leveraged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EpochId(pub u64);

impl EpochId {
    pub fn next(self) -> Result<EpochId> {
        self.0
            .checked_add(1)
            .map(EpochId)
            .ok_or_else(|| StrataError::BoundedValueExceeded("epoch id overflow".into()))
    }
}

impl std::fmt::Display for EpochId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bps_rejects_values_above_one_hundred_percent() {
        assert!(Bps::new(10_000).is_ok());
        assert!(matches!(Bps::new(10_001), Err(StrataError::ConfigError(_))));
        assert_eq!(Bps::saturating_from_u64(50_000), Bps::MAX);
    }

    #[test]
    fn bps_serde_is_validated() {
        let ok: Bps = serde_json::from_str("2500").unwrap();
        assert_eq!(ok.get(), 2_500);
        assert!(serde_json::from_str::<Bps>("12000").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "2500");
    }

    #[test]
    fn account_ids_are_stable_and_distinct() {
        assert_eq!(AccountId::from_label("alice"), AccountId::from_label("alice"));
        assert_ne!(AccountId::from_label("alice"), AccountId::from_label("bob"));
    }

    #[test]
    fn epoch_id_next_is_checked() {
        assert_eq!(EpochId(4).next().unwrap(), EpochId(5));
        assert!(EpochId(u64::MAX).next().is_err());
    }
}
