//! Five-level safety state machine with deposit gating.
//!
//! The level is recomputed on every `update_level` / `health_check`. Entering `Critical` with
//! auto-pause enabled pauses deposits on both tranches; leaving it never unpauses.
//! Withdrawals are not gated here.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::classifier::{classify, SafetyLevel, SafetyThresholds};
use crate::access::{Caller, Role};
use crate::config::SafetyConfig;
use crate::math::{add_u64, buffer_ratio};
use crate::metrics::EngineMetrics;
use crate::types::{Bps, TrancheKind};
use crate::{PrincipalSource, Result, StrataError};

/// Per-level deposit and rate policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPolicy {
    /// A protected deposit may not push the buffer ratio below this.
    pub min_buffer_ratio: Bps,
    /// Cap on total protected principal after a deposit; 0 disables the cap.
    pub max_protected_deposit_ceiling: u64,
    /// Advisory fixed rate for this level.
    pub target_protected_rate: Bps,
    pub protected_deposits_enabled: bool,
    pub leveraged_deposits_enabled: bool,
}

impl LevelPolicy {
    /// Default table, indexed by `SafetyLevel::index()`.
    pub fn defaults() -> [LevelPolicy; 5] {
        let policy = |min_ratio: u64, rate: u64, protected_open: bool| LevelPolicy {
            min_buffer_ratio: Bps::saturating_from_u64(min_ratio),
            max_protected_deposit_ceiling: 0,
            target_protected_rate: Bps::saturating_from_u64(rate),
            protected_deposits_enabled: protected_open,
            leveraged_deposits_enabled: true,
        };
        [
            policy(1_000, 500, true),
            policy(1_000, 450, true),
            policy(1_000, 400, true),
            policy(500, 300, false),
            policy(500, 300, false),
        ]
    }
}

/// Why a deposit pre-check failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositRejection {
    /// Deposits into this tranche are paused (manually or by auto-pause).
    DepositsPaused,
    DisabledAtLevel {
        tranche: TrancheKind,
        level: SafetyLevel,
    },
    CeilingExceeded {
        resulting: u64,
        ceiling: u64,
    },
    BelowMinimumRatio {
        resulting: Bps,
        minimum: Bps,
    },
}

impl std::fmt::Display for DepositRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepositRejection::DepositsPaused => write!(f, "deposits are paused"),
            DepositRejection::DisabledAtLevel { tranche, level } => {
                write!(f, "{tranche:?} deposits disabled at level {level}")
            }
            DepositRejection::CeilingExceeded { resulting, ceiling } => write!(
                f,
                "protected principal {resulting} would exceed ceiling {ceiling}"
            ),
            DepositRejection::BelowMinimumRatio { resulting, minimum } => write!(
                f,
                "buffer ratio {resulting} would fall below minimum {minimum}"
            ),
        }
    }
}

/// Result of a deposit pre-check. Rejection is a value, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositCheck {
    pub allowed: bool,
    pub reason: Option<DepositRejection>,
}

impl DepositCheck {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn reject(reason: DepositRejection) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    /// For callers that treat a rejection as fatal.
    pub fn into_result(self) -> Result<()> {
        match self.reason {
            Some(reason) if !self.allowed => Err(StrataError::DepositRejected(reason)),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug)]
struct SafetyState {
    level: SafetyLevel,
    thresholds: SafetyThresholds,
    policies: [LevelPolicy; 5],
    protected_paused: bool,
    leveraged_paused: bool,
    auto_pause: bool,
}

impl SafetyState {
    fn paused(&self, tranche: TrancheKind) -> bool {
        match tranche {
            TrancheKind::Protected => self.protected_paused,
            TrancheKind::Leveraged => self.leveraged_paused,
        }
    }
}

pub struct SafetyController {
    state: Mutex<SafetyState>,
    principals: Arc<dyn PrincipalSource>,
    metrics: Arc<EngineMetrics>,
}

impl SafetyController {
    /// Starts at `Healthy` with nothing paused.
    pub fn new(
        config: &SafetyConfig,
        principals: Arc<dyn PrincipalSource>,
        metrics: Arc<EngineMetrics>,
    ) -> Result<Self> {
        config.thresholds.validate()?;
        metrics.safety_level.set(SafetyLevel::Healthy.index() as u64);
        Ok(Self {
            state: Mutex::new(SafetyState {
                level: SafetyLevel::Healthy,
                thresholds: config.thresholds,
                policies: config.policies,
                protected_paused: false,
                leveraged_paused: false,
                auto_pause: config.auto_pause,
            }),
            principals,
            metrics,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, SafetyState>> {
        self.state
            .lock()
            .map_err(|_| StrataError::LockPoisoned("safety controller"))
    }

    pub fn level(&self) -> Result<SafetyLevel> {
        Ok(self.lock()?.level)
    }

    pub fn is_paused(&self, tranche: TrancheKind) -> Result<bool> {
        Ok(self.lock()?.paused(tranche))
    }

    pub fn thresholds(&self) -> Result<SafetyThresholds> {
        Ok(self.lock()?.thresholds)
    }

    pub fn policy(&self, level: SafetyLevel) -> Result<LevelPolicy> {
        Ok(self.lock()?.policies[level.index()])
    }

    pub fn current_policy(&self) -> Result<LevelPolicy> {
        let st = self.lock()?;
        Ok(st.policies[st.level.index()])
    }

    /// Reclassify from a ratio supplied by a keeper.
    #[instrument(skip(self, caller))]
    pub fn update_level(&self, caller: &Caller, ratio: Bps) -> Result<SafetyLevel> {
        caller.require(Role::Keeper)?;
        let mut st = self.lock()?;
        Ok(self.apply_level(&mut st, ratio))
    }

    /// Reclassify from the live principals. Permissionless.
    ///
    /// An empty pool is treated as fully buffered.
    #[instrument(skip(self))]
    pub fn health_check(&self) -> Result<SafetyLevel> {
        let (protected, leveraged) = self.principals.principals()?;
        let ratio = if protected == 0 && leveraged == 0 {
            Bps::MAX
        } else {
            buffer_ratio(protected, leveraged)?
        };
        let mut st = self.lock()?;
        Ok(self.apply_level(&mut st, ratio))
    }

    fn apply_level(&self, st: &mut SafetyState, ratio: Bps) -> SafetyLevel {
        self.metrics.buffer_ratio_bps.set(ratio.as_u64());
        let next = classify(ratio, &st.thresholds);
        if next == st.level {
            debug!(level = %next, "safety level unchanged");
            return next;
        }

        let previous = st.level;
        st.level = next;
        self.metrics.level_transitions.inc();
        self.metrics.safety_level.set(next.index() as u64);
        info!(from = %previous, to = %next, ratio = %ratio, "safety level changed");

        if next == SafetyLevel::Critical && st.auto_pause {
            st.protected_paused = true;
            st.leveraged_paused = true;
            self.metrics.auto_pauses.inc();
            warn!(ratio = %ratio, "entered critical; deposits auto-paused");
        }
        next
    }

    /// Would a deposit of `amount` into `tranche` be accepted against the given principals?
    pub fn check_deposit(
        &self,
        tranche: TrancheKind,
        amount: u64,
        protected: u64,
        leveraged: u64,
    ) -> Result<DepositCheck> {
        let st = self.lock()?;
        let check = evaluate_deposit(&st, tranche, amount, protected, leveraged)?;
        if let Some(reason) = check.reason {
            self.metrics.deposit_rejections.inc();
            debug!(?tranche, amount, %reason, "deposit rejected");
        }
        Ok(check)
    }

    /// `check_deposit` against the live principals.
    pub fn check_deposit_live(&self, tranche: TrancheKind, amount: u64) -> Result<DepositCheck> {
        let (protected, leveraged) = self.principals.principals()?;
        self.check_deposit(tranche, amount, protected, leveraged)
    }

    // ---------------------------------------------------------------------
    // Admin
    // ---------------------------------------------------------------------

    #[instrument(skip(self, caller))]
    pub fn set_paused(&self, caller: &Caller, tranche: TrancheKind, paused: bool) -> Result<()> {
        caller.require(Role::Admin)?;
        let mut st = self.lock()?;
        match tranche {
            TrancheKind::Protected => st.protected_paused = paused,
            TrancheKind::Leveraged => st.leveraged_paused = paused,
        }
        info!(?tranche, paused, "deposit pause updated");
        Ok(())
    }

    pub fn set_auto_pause(&self, caller: &Caller, enabled: bool) -> Result<()> {
        caller.require(Role::Admin)?;
        self.lock()?.auto_pause = enabled;
        info!(enabled, "auto-pause updated");
        Ok(())
    }

    pub fn set_level_policy(
        &self,
        caller: &Caller,
        level: SafetyLevel,
        policy: LevelPolicy,
    ) -> Result<()> {
        caller.require(Role::Admin)?;
        self.lock()?.policies[level.index()] = policy;
        info!(%level, ?policy, "level policy updated");
        Ok(())
    }

    /// Takes effect at the next reclassification.
    pub fn set_thresholds(&self, caller: &Caller, thresholds: SafetyThresholds) -> Result<()> {
        caller.require(Role::Admin)?;
        thresholds.validate()?;
        self.lock()?.thresholds = thresholds;
        info!(?thresholds, "safety thresholds updated");
        Ok(())
    }
}

fn evaluate_deposit(
    st: &SafetyState,
    tranche: TrancheKind,
    amount: u64,
    protected: u64,
    leveraged: u64,
) -> Result<DepositCheck> {
    if st.paused(tranche) {
        return Ok(DepositCheck::reject(DepositRejection::DepositsPaused));
    }

    let policy = &st.policies[st.level.index()];
    let enabled = match tranche {
        TrancheKind::Protected => policy.protected_deposits_enabled,
        TrancheKind::Leveraged => policy.leveraged_deposits_enabled,
    };
    if !enabled {
        return Ok(DepositCheck::reject(DepositRejection::DisabledAtLevel {
            tranche,
            level: st.level,
        }));
    }

    // Leveraged deposits only raise the ratio, so the remaining checks gate protected inflow.
    if tranche == TrancheKind::Leveraged {
        return Ok(DepositCheck::allow());
    }

    let resulting = add_u64(protected, amount)?;
    let ceiling = policy.max_protected_deposit_ceiling;
    if ceiling > 0 && resulting > ceiling {
        return Ok(DepositCheck::reject(DepositRejection::CeilingExceeded {
            resulting,
            ceiling,
        }));
    }

    let ratio = buffer_ratio(resulting, leveraged)?;
    if ratio < policy.min_buffer_ratio {
        return Ok(DepositCheck::reject(DepositRejection::BelowMinimumRatio {
            resulting: ratio,
            minimum: policy.min_buffer_ratio,
        }));
    }

    Ok(DepositCheck::allow())
}
