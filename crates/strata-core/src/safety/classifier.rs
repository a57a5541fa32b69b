//! Pure buffer-ratio classification.

use serde::{Deserialize, Serialize};

use crate::types::Bps;
use crate::{Result, StrataError};

/// Risk level, ordered by severity (`Healthy < Critical`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SafetyLevel {
    Healthy,
    Caution,
    Warning,
    Danger,
    Critical,
}

impl SafetyLevel {
    pub const ALL: [SafetyLevel; 5] = [
        SafetyLevel::Healthy,
        SafetyLevel::Caution,
        SafetyLevel::Warning,
        SafetyLevel::Danger,
        SafetyLevel::Critical,
    ];

    /// Position in `ALL`, used to index per-level policy tables.
    pub const fn index(self) -> usize {
        match self {
            SafetyLevel::Healthy => 0,
            SafetyLevel::Caution => 1,
            SafetyLevel::Warning => 2,
            SafetyLevel::Danger => 3,
            SafetyLevel::Critical => 4,
        }
    }
}

impl std::fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SafetyLevel::Healthy => "healthy",
            SafetyLevel::Caution => "caution",
            SafetyLevel::Warning => "warning",
            SafetyLevel::Danger => "danger",
            SafetyLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Lower bounds (inclusive) of the four non-critical levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyThresholds {
    pub healthy: Bps,
    pub caution: Bps,
    pub warning: Bps,
    pub danger: Bps,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            healthy: Bps::saturating_from_u64(2_000),
            caution: Bps::saturating_from_u64(1_500),
            warning: Bps::saturating_from_u64(1_000),
            danger: Bps::saturating_from_u64(500),
        }
    }
}

impl SafetyThresholds {
    /// Thresholds must be strictly descending so every ratio maps to exactly one level.
    pub fn validate(&self) -> Result<()> {
        if self.healthy > self.caution && self.caution > self.warning && self.warning > self.danger
        {
            Ok(())
        } else {
            Err(StrataError::ConfigError(format!(
                "safety thresholds must be strictly descending: {} > {} > {} > {}",
                self.healthy, self.caution, self.warning, self.danger
            )))
        }
    }
}

/// Maps a buffer ratio to its level. Total over `[0, 10_000]`.
pub fn classify(ratio: Bps, thresholds: &SafetyThresholds) -> SafetyLevel {
    if ratio >= thresholds.healthy {
        SafetyLevel::Healthy
    } else if ratio >= thresholds.caution {
        SafetyLevel::Caution
    } else if ratio >= thresholds.warning {
        SafetyLevel::Warning
    } else if ratio >= thresholds.danger {
        SafetyLevel::Danger
    } else {
        SafetyLevel::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bps(v: u16) -> Bps {
        Bps::new(v).unwrap()
    }

    #[test]
    fn default_boundaries_are_inclusive() {
        let t = SafetyThresholds::default();
        assert_eq!(classify(bps(2_000), &t), SafetyLevel::Healthy);
        assert_eq!(classify(bps(1_999), &t), SafetyLevel::Caution);
        assert_eq!(classify(bps(1_500), &t), SafetyLevel::Caution);
        assert_eq!(classify(bps(1_000), &t), SafetyLevel::Warning);
        assert_eq!(classify(bps(500), &t), SafetyLevel::Danger);
        assert_eq!(classify(bps(499), &t), SafetyLevel::Critical);
        assert_eq!(classify(Bps::ZERO, &t), SafetyLevel::Critical);
        assert_eq!(classify(Bps::MAX, &t), SafetyLevel::Healthy);
    }

    #[test]
    fn non_descending_thresholds_are_rejected() {
        assert!(SafetyThresholds::default().validate().is_ok());
        let t = SafetyThresholds {
            caution: bps(2_000),
            ..SafetyThresholds::default()
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn index_matches_all_ordering() {
        for (i, level) in SafetyLevel::ALL.iter().enumerate() {
            assert_eq!(level.index(), i);
        }
        assert!(SafetyLevel::Healthy < SafetyLevel::Critical);
    }

    /// Four distinct bounds, assigned so that healthy > caution > warning > danger.
    fn descending_thresholds() -> impl Strategy<Value = SafetyThresholds> {
        prop::collection::btree_set(0u16..=10_000u16, 4).prop_map(|set| {
            let v: Vec<u16> = set.into_iter().collect();
            SafetyThresholds {
                healthy: bps(v[3]),
                caution: bps(v[2]),
                warning: bps(v[1]),
                danger: bps(v[0]),
            }
        })
    }

    proptest! {
        #[test]
        fn classification_is_monotone(
            t in descending_thresholds(),
            a in 0u16..=10_000u16,
            b in 0u16..=10_000u16,
        ) {
            prop_assert!(t.validate().is_ok());
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            // Higher ratio is never more severe.
            prop_assert!(classify(bps(hi), &t) <= classify(bps(lo), &t));
        }

        #[test]
        fn each_bound_starts_its_own_level(t in descending_thresholds()) {
            prop_assert_eq!(classify(t.healthy, &t), SafetyLevel::Healthy);
            prop_assert_eq!(classify(t.caution, &t), SafetyLevel::Caution);
            prop_assert_eq!(classify(t.warning, &t), SafetyLevel::Warning);
            prop_assert_eq!(classify(t.danger, &t), SafetyLevel::Danger);
            if t.danger.get() > 0 {
                prop_assert_eq!(classify(bps(t.danger.get() - 1), &t), SafetyLevel::Critical);
            }
        }
    }
}
