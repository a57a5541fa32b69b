//! Harvest orchestration over the two tranche ledgers.
//!
//! The controller keeps cached principal counters, the current fixed rate and the emergency
//! flag behind one mutex. Each harvest reads live totals from the ledgers, runs the waterfall
//! and applies the result through the collaborator traits.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::access::{Caller, Role};
use crate::config::{DistributionConfig, MAX_PROTOCOL_FEE_BPS};
use crate::math::{add_u64, buffer_ratio, leverage};
use crate::metrics::EngineMetrics;
use crate::rate_model::RateModel;
use crate::types::{Bps, TrancheKind};
use crate::waterfall::{distribute, DistributionResult, WaterfallInput};
use crate::{
    Clock, PrincipalSource, RateSource, Result, StrataError, TrancheLedger, Treasury,
    YieldStrategy,
};

/// Collaborators the controller drives.
#[derive(Clone)]
pub struct DistributionDeps {
    pub protected: Arc<dyn TrancheLedger>,
    pub leveraged: Arc<dyn TrancheLedger>,
    pub strategy: Arc<dyn YieldStrategy>,
    pub treasury: Arc<dyn Treasury>,
    /// Optional; only read by `sync_rate_from_source`.
    pub rate_source: Option<Arc<dyn RateSource>>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<EngineMetrics>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DistributionState {
    initialized: bool,
    protected_principal: u64,
    leveraged_principal: u64,
    fixed_rate: Bps,
    protocol_fee: Bps,
    emergency: bool,
    last_harvest_time: u64,
    harvest_count: u64,
}

/// What one harvest did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestReport {
    /// 1-based index of this harvest.
    pub harvest_index: u64,
    pub elapsed_secs: u64,
    pub profit: i128,
    pub result: DistributionResult,
    /// Amount the leveraged ledger actually gave up (may be below `result.leveraged_slash`).
    pub slashed: u64,
    pub emergency_triggered: bool,
    /// Rate in force after the harvest.
    pub fixed_rate: Bps,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarvestOutcome {
    /// No time elapsed since the previous harvest; nothing was touched.
    Skipped,
    Distributed(HarvestReport),
}

impl HarvestOutcome {
    pub fn report(&self) -> Option<&HarvestReport> {
        match self {
            HarvestOutcome::Skipped => None,
            HarvestOutcome::Distributed(report) => Some(report),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSnapshot {
    pub initialized: bool,
    pub protected_principal: u64,
    pub leveraged_principal: u64,
    pub fixed_rate: Bps,
    pub protocol_fee: Bps,
    pub buffer_ratio: Bps,
    /// Bps of leveraged principal; 0 when there is none.
    pub leverage: u64,
    pub emergency: bool,
    pub last_harvest_time: u64,
    pub harvest_count: u64,
}

pub struct DistributionController {
    state: Mutex<DistributionState>,
    rate_model: RateModel,
    deps: DistributionDeps,
    identity: Caller,
}

impl DistributionController {
    /// `identity` is the capability the controller presents to the ledgers; it must hold
    /// `Role::Distributor`.
    pub fn new(config: &DistributionConfig, identity: Caller, deps: DistributionDeps) -> Result<Self> {
        identity.require(Role::Distributor)?;
        if config.protocol_fee.get() > MAX_PROTOCOL_FEE_BPS {
            return Err(StrataError::ConfigError(format!(
                "protocol_fee must be at most {MAX_PROTOCOL_FEE_BPS}bps"
            )));
        }
        let rate_model = RateModel::from_config(config)?;
        Ok(Self {
            state: Mutex::new(DistributionState {
                initialized: false,
                protected_principal: 0,
                leveraged_principal: 0,
                fixed_rate: rate_model.derive(0, 0)?,
                protocol_fee: config.protocol_fee,
                emergency: false,
                last_harvest_time: 0,
                harvest_count: 0,
            }),
            rate_model,
            deps,
            identity,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, DistributionState>> {
        self.state
            .lock()
            .map_err(|_| StrataError::LockPoisoned("distribution controller"))
    }

    pub fn rate_model(&self) -> RateModel {
        self.rate_model
    }

    pub fn fixed_rate(&self) -> Result<Bps> {
        Ok(self.lock()?.fixed_rate)
    }

    pub fn is_emergency(&self) -> Result<bool> {
        Ok(self.lock()?.emergency)
    }

    pub fn snapshot(&self) -> Result<DistributionSnapshot> {
        let st = *self.lock()?;
        Ok(DistributionSnapshot {
            initialized: st.initialized,
            protected_principal: st.protected_principal,
            leveraged_principal: st.leveraged_principal,
            fixed_rate: st.fixed_rate,
            protocol_fee: st.protocol_fee,
            buffer_ratio: buffer_ratio(st.protected_principal, st.leveraged_principal)?,
            leverage: leverage(st.protected_principal, st.leveraged_principal)?,
            emergency: st.emergency,
            last_harvest_time: st.last_harvest_time,
            harvest_count: st.harvest_count,
        })
    }

    /// Starts the harvest clock and seeds the counters from the ledgers. Once only.
    #[instrument(skip(self, caller))]
    pub fn initialize(&self, caller: &Caller) -> Result<()> {
        caller.require(Role::Admin)?;
        let mut st = self.lock()?;
        if st.initialized {
            return Err(StrataError::AlreadyInitialized);
        }
        st.protected_principal = self.deps.protected.total_principal()?;
        st.leveraged_principal = self.deps.leveraged.total_principal()?;
        st.last_harvest_time = self.deps.clock.now_secs();

        let rate = self.rate_model.derive(st.protected_principal, st.leveraged_principal)?;
        self.deps.protected.set_fixed_rate(&self.identity, rate)?;
        st.fixed_rate = rate;
        st.initialized = true;
        self.deps.metrics.fixed_rate_bps.set(rate.as_u64());
        info!(
            protected = st.protected_principal,
            leveraged = st.leveraged_principal,
            rate = %rate,
            "distribution controller initialized"
        );
        Ok(())
    }

    /// Records new principal and re-derives the fixed rate. Returns the rate now in force.
    #[instrument(skip(self, caller))]
    pub fn register_principal(&self, caller: &Caller, kind: TrancheKind, amount: u64) -> Result<Bps> {
        caller.require(Role::Vault)?;
        if amount == 0 {
            return Err(StrataError::ZeroAmount);
        }
        let mut st = self.lock()?;
        if !st.initialized {
            return Err(StrataError::NotInitialized);
        }
        match kind {
            TrancheKind::Protected => {
                st.protected_principal = add_u64(st.protected_principal, amount)?
            }
            TrancheKind::Leveraged => {
                st.leveraged_principal = add_u64(st.leveraged_principal, amount)?
            }
        }
        self.apply_derived_rate(&mut st)
    }

    /// Removes principal (clamped at zero) and re-derives the fixed rate.
    #[instrument(skip(self, caller))]
    pub fn deregister_principal(
        &self,
        caller: &Caller,
        kind: TrancheKind,
        amount: u64,
    ) -> Result<Bps> {
        caller.require(Role::Vault)?;
        if amount == 0 {
            return Err(StrataError::ZeroAmount);
        }
        let mut st = self.lock()?;
        if !st.initialized {
            return Err(StrataError::NotInitialized);
        }
        let counter = match kind {
            TrancheKind::Protected => &mut st.protected_principal,
            TrancheKind::Leveraged => &mut st.leveraged_principal,
        };
        if amount > *counter {
            debug!(?kind, amount, held = *counter, "deregister clamped at zero");
        }
        *counter = counter.saturating_sub(amount);
        self.apply_derived_rate(&mut st)
    }

    fn apply_derived_rate(&self, st: &mut DistributionState) -> Result<Bps> {
        let rate = self
            .rate_model
            .derive(st.protected_principal, st.leveraged_principal)?;
        self.install_rate(st, rate)?;
        Ok(rate)
    }

    fn install_rate(&self, st: &mut DistributionState, rate: Bps) -> Result<()> {
        if rate == st.fixed_rate {
            return Ok(());
        }
        self.deps.protected.set_fixed_rate(&self.identity, rate)?;
        info!(from = %st.fixed_rate, to = %rate, "fixed rate changed");
        st.fixed_rate = rate;
        self.deps.metrics.rate_changes.inc();
        self.deps.metrics.fixed_rate_bps.set(rate.as_u64());
        Ok(())
    }

    /// Runs one harvest through the waterfall.
    ///
    /// Collaborator failures abort the call; effects already applied to earlier collaborators
    /// are not rolled back.
    #[instrument(skip(self, caller))]
    pub fn harvest(&self, caller: &Caller) -> Result<HarvestOutcome> {
        caller.require(Role::Keeper)?;
        let mut st = self.lock()?;
        if !st.initialized {
            return Err(StrataError::NotInitialized);
        }
        if st.emergency {
            return Err(StrataError::EmergencyMode);
        }

        let now = self.deps.clock.now_secs();
        let elapsed = now.saturating_sub(st.last_harvest_time);
        if elapsed == 0 {
            self.deps.metrics.harvests_skipped.inc();
            debug!(now, "harvest skipped: no time elapsed");
            return Ok(HarvestOutcome::Skipped);
        }

        let profit = self.deps.strategy.harvest()?;
        self.reconcile(&mut st)?;
        let leveraged_capacity = self.deps.leveraged.loss_capacity()?;

        let result = distribute(&WaterfallInput {
            protected_principal: st.protected_principal,
            leveraged_capacity,
            fixed_rate: st.fixed_rate,
            protocol_fee: st.protocol_fee,
            elapsed_secs: elapsed,
            signed_profit: profit,
        })?;

        if result.protocol_fee > 0 {
            self.deps.treasury.receive(result.protocol_fee)?;
        }
        let slashed = if result.leveraged_slash > 0 {
            self.deps
                .leveraged
                .slash_principal(&self.identity, result.leveraged_slash)?
        } else {
            0
        };
        if slashed < result.leveraged_slash {
            warn!(
                requested = result.leveraged_slash,
                slashed, "leveraged ledger could not fund the full slash"
            );
        }
        if result.protected_yield > 0 {
            self.deps
                .protected
                .credit_yield(&self.identity, result.protected_yield)?;
        }
        if result.leveraged_yield > 0 {
            self.deps
                .leveraged
                .credit_yield(&self.identity, result.leveraged_yield)?;
        }

        let emergency_triggered = !result.protected_fully_paid;
        if emergency_triggered {
            st.emergency = true;
            self.deps.metrics.emergency_activations.inc();
            warn!(
                obligation = result.obligation,
                paid = result.protected_yield,
                profit,
                "protected obligation not met; emergency mode enabled"
            );
        }

        st.last_harvest_time = now;
        st.harvest_count = add_u64(st.harvest_count, 1)?;
        st.protected_principal = self.deps.protected.total_principal()?;
        st.leveraged_principal = self.deps.leveraged.total_principal()?;
        let fixed_rate = self.apply_derived_rate(&mut st)?;

        let m = &self.deps.metrics;
        m.harvests_total.inc();
        m.protocol_fees_total.inc_by(result.protocol_fee);
        m.protected_yield_total.inc_by(result.protected_yield);
        m.leveraged_yield_total.inc_by(result.leveraged_yield);
        m.slashed_total.inc_by(slashed);

        info!(
            harvest = st.harvest_count,
            elapsed,
            profit,
            fee = result.protocol_fee,
            protected_yield = result.protected_yield,
            leveraged_yield = result.leveraged_yield,
            slashed,
            "harvest distributed"
        );

        Ok(HarvestOutcome::Distributed(HarvestReport {
            harvest_index: st.harvest_count,
            elapsed_secs: elapsed,
            profit,
            result,
            slashed,
            emergency_triggered,
            fixed_rate,
        }))
    }

    /// Ledger totals win over the cached counters.
    fn reconcile(&self, st: &mut DistributionState) -> Result<()> {
        let protected = self.deps.protected.total_principal()?;
        let leveraged = self.deps.leveraged.total_principal()?;
        if protected != st.protected_principal || leveraged != st.leveraged_principal {
            warn!(
                cached_protected = st.protected_principal,
                live_protected = protected,
                cached_leveraged = st.leveraged_principal,
                live_leveraged = leveraged,
                "principal counters drifted from ledgers; using ledger totals"
            );
        }
        st.protected_principal = protected;
        st.leveraged_principal = leveraged;
        Ok(())
    }

    #[instrument(skip(self, caller))]
    pub fn clear_emergency(&self, caller: &Caller) -> Result<()> {
        caller.require(Role::Admin)?;
        let mut st = self.lock()?;
        if st.emergency {
            st.emergency = false;
            info!("emergency mode cleared");
        }
        Ok(())
    }

    /// Recalls everything from the strategy and sends it to the treasury. Leaves the
    /// controller in emergency mode. Returns the amount recalled.
    #[instrument(skip(self, caller))]
    pub fn emergency_withdraw(&self, caller: &Caller) -> Result<u64> {
        caller.require(Role::Admin)?;
        let mut st = self.lock()?;
        let assets = self.deps.strategy.total_assets()?;
        let recalled = self.deps.strategy.withdraw(assets)?;
        if recalled > 0 {
            self.deps.treasury.receive(recalled)?;
        }
        if !st.emergency {
            st.emergency = true;
            self.deps.metrics.emergency_activations.inc();
        }
        warn!(assets, recalled, "emergency withdraw swept strategy funds to treasury");
        Ok(recalled)
    }

    /// Pulls the target rate from the configured source, clamped to the model bounds.
    #[instrument(skip(self, caller))]
    pub fn sync_rate_from_source(&self, caller: &Caller) -> Result<Bps> {
        caller.require(Role::Admin)?;
        let source = self
            .deps
            .rate_source
            .as_ref()
            .ok_or_else(|| StrataError::InvalidState("no rate source configured".into()))?;
        let target = source.target_rate()?;
        let rate = self.rate_model.clamp(target);
        if rate != target {
            debug!(%target, %rate, "external rate clamped");
        }
        let mut st = self.lock()?;
        self.install_rate(&mut st, rate)?;
        Ok(rate)
    }

    pub fn set_protocol_fee(&self, caller: &Caller, fee: Bps) -> Result<()> {
        caller.require(Role::Admin)?;
        if fee.get() > MAX_PROTOCOL_FEE_BPS {
            return Err(StrataError::ConfigError(format!(
                "protocol_fee must be at most {MAX_PROTOCOL_FEE_BPS}bps"
            )));
        }
        self.lock()?.protocol_fee = fee;
        info!(%fee, "protocol fee updated");
        Ok(())
    }
}

impl PrincipalSource for DistributionController {
    fn principals(&self) -> Result<(u64, u64)> {
        Ok((
            self.deps.protected.total_principal()?,
            self.deps.leveraged.total_principal()?,
        ))
    }
}
