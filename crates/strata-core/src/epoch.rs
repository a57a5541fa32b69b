//! Epoch-batched withdrawals.
//!
//! Each epoch moves `Open -> Locked -> Settled`. Requests are filed against the open epoch and
//! only redeemed by that epoch's settlement. Early withdrawals skip the queue for a penalty that
//! accumulates in a pool and is handed to the tranches at the next settlement.
//!
//! Lock order: the epoch book is locked first and the distribution controller is called while
//! it is held. The distribution controller never calls back in here.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::access::{Caller, Role};
use crate::config::{EpochConfig, MAX_EARLY_WITHDRAW_PENALTY_BPS};
use crate::distribution::{DistributionController, HarvestOutcome};
use crate::math::{add_u64, floor_bps, pro_rata, sub_u64};
use crate::metrics::EngineMetrics;
use crate::types::{AccountId, Bps, EpochId, TrancheKind};
use crate::{Clock, Payouts, Result, StrataError, TrancheLedger};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpochState {
    Open,
    Locked,
    Settled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub id: EpochId,
    pub start_time: u64,
    pub end_time: u64,
    pub state: EpochState,
    /// Shares requested across both tranches.
    pub total_withdraw_requests: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub user: AccountId,
    pub tranche: TrancheKind,
    pub shares: u64,
    pub epoch_id: EpochId,
    pub processed: bool,
}

/// What one settlement did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub epoch: EpochId,
    /// `None` when the harvest was skipped because the distribution side is in emergency mode.
    pub harvest: Option<HarvestOutcome>,
    pub requests_processed: u64,
    pub redeemed_protected: u64,
    pub redeemed_leveraged: u64,
    pub penalty_distributed: u64,
    /// Pool left for a later settlement because both tranches were empty.
    pub penalty_deferred: u64,
    pub next_epoch: EpochId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyWithdrawal {
    pub shares: u64,
    /// Redemption value before the penalty.
    pub gross: u64,
    pub penalty: u64,
    /// Paid to the user immediately.
    pub paid: u64,
}

/// Collaborators the epoch controller drives.
#[derive(Clone)]
pub struct EpochDeps {
    pub distribution: Arc<DistributionController>,
    pub protected: Arc<dyn TrancheLedger>,
    pub leveraged: Arc<dyn TrancheLedger>,
    /// Pays early-exit proceeds out of the engine's own account.
    pub payouts: Arc<dyn Payouts>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<EngineMetrics>,
}

#[derive(Debug)]
struct EpochBook {
    current: EpochId,
    epochs: BTreeMap<EpochId, Epoch>,
    requests: BTreeMap<EpochId, Vec<WithdrawRequest>>,
    accumulated_penalty: u64,
    duration_secs: u64,
    early_withdraw_penalty: Bps,
}

impl EpochBook {
    fn epoch_mut(&mut self, id: EpochId) -> Result<&mut Epoch> {
        self.epochs
            .get_mut(&id)
            .ok_or_else(|| StrataError::InvalidState(format!("epoch {id} missing from book")))
    }

    fn current_epoch(&self) -> Result<Epoch> {
        self.epochs.get(&self.current).copied().ok_or_else(|| {
            StrataError::InvalidState(format!("epoch {} missing from book", self.current))
        })
    }

    fn require_current(&self, id: EpochId) -> Result<()> {
        if id == self.current {
            Ok(())
        } else {
            Err(StrataError::NotActiveEpoch {
                epoch: id.0,
                active: self.current.0,
            })
        }
    }

    fn pending_shares(&self, epoch: EpochId, user: AccountId, tranche: TrancheKind) -> u64 {
        self.requests
            .get(&epoch)
            .map(|reqs| {
                reqs.iter()
                    .filter(|r| !r.processed && r.user == user && r.tranche == tranche)
                    .map(|r| r.shares)
                    .fold(0u64, u64::saturating_add)
            })
            .unwrap_or(0)
    }
}

fn require_state(epoch: &Epoch, expected: EpochState) -> Result<()> {
    if epoch.state == expected {
        Ok(())
    } else {
        Err(StrataError::EpochState {
            epoch: epoch.id.0,
            expected,
            actual: epoch.state,
        })
    }
}

pub struct EpochController {
    book: Mutex<EpochBook>,
    deps: EpochDeps,
    identity: Caller,
}

impl EpochController {
    /// Opens epoch 1 at the current time.
    ///
    /// `identity` must hold `Distributor` (penalty credits), `Vault` (principal bookkeeping)
    /// and `Keeper` (settlement harvests). Its account receives early-exit redemptions before
    /// they are paid out.
    pub fn new(config: &EpochConfig, identity: Caller, deps: EpochDeps) -> Result<Self> {
        for role in [Role::Distributor, Role::Vault, Role::Keeper] {
            identity.require(role)?;
        }
        if config.duration_secs == 0 {
            return Err(StrataError::ConfigError(
                "epoch duration_secs must be greater than 0".into(),
            ));
        }
        check_penalty(config.early_withdraw_penalty)?;

        let now = deps.clock.now_secs();
        let first = EpochId(1);
        let mut epochs = BTreeMap::new();
        epochs.insert(
            first,
            Epoch {
                id: first,
                start_time: now,
                end_time: add_u64(now, config.duration_secs)?,
                state: EpochState::Open,
                total_withdraw_requests: 0,
            },
        );
        Ok(Self {
            book: Mutex::new(EpochBook {
                current: first,
                epochs,
                requests: BTreeMap::new(),
                accumulated_penalty: 0,
                duration_secs: config.duration_secs,
                early_withdraw_penalty: config.early_withdraw_penalty,
            }),
            deps,
            identity,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, EpochBook>> {
        self.book
            .lock()
            .map_err(|_| StrataError::LockPoisoned("epoch controller"))
    }

    fn ledger(&self, kind: TrancheKind) -> &Arc<dyn TrancheLedger> {
        match kind {
            TrancheKind::Protected => &self.deps.protected,
            TrancheKind::Leveraged => &self.deps.leveraged,
        }
    }

    pub fn current_epoch(&self) -> Result<Epoch> {
        self.lock()?.current_epoch()
    }

    pub fn epoch(&self, id: EpochId) -> Result<Option<Epoch>> {
        Ok(self.lock()?.epochs.get(&id).copied())
    }

    /// Unprocessed requests filed against `id`.
    pub fn pending_requests(&self, id: EpochId) -> Result<Vec<WithdrawRequest>> {
        Ok(self
            .lock()?
            .requests
            .get(&id)
            .map(|reqs| reqs.iter().filter(|r| !r.processed).copied().collect())
            .unwrap_or_default())
    }

    /// Every request filed against `id`, processed or not.
    pub fn requests(&self, id: EpochId) -> Result<Vec<WithdrawRequest>> {
        Ok(self.lock()?.requests.get(&id).cloned().unwrap_or_default())
    }

    pub fn accumulated_penalty(&self) -> Result<u64> {
        Ok(self.lock()?.accumulated_penalty)
    }

    pub fn early_withdraw_penalty(&self) -> Result<Bps> {
        Ok(self.lock()?.early_withdraw_penalty)
    }

    pub fn set_early_withdraw_penalty(&self, caller: &Caller, penalty: Bps) -> Result<()> {
        caller.require(Role::Admin)?;
        check_penalty(penalty)?;
        self.lock()?.early_withdraw_penalty = penalty;
        info!(%penalty, "early withdraw penalty updated");
        Ok(())
    }

    /// Queues `shares` of the caller's `tranche` position for the open epoch's settlement.
    #[instrument(skip(self, caller), fields(user = %caller.account()))]
    pub fn request_withdraw(
        &self,
        caller: &Caller,
        tranche: TrancheKind,
        shares: u64,
    ) -> Result<EpochId> {
        if shares == 0 {
            return Err(StrataError::ZeroAmount);
        }
        let mut book = self.lock()?;
        let epoch = book.current_epoch()?;
        require_state(&epoch, EpochState::Open)?;

        let user = caller.account();
        let balance = self.ledger(tranche).balance_of(user)?;
        let already = book.pending_shares(epoch.id, user, tranche);
        let available = balance.saturating_sub(already);
        if shares > available {
            return Err(StrataError::InsufficientShares {
                requested: shares,
                available,
            });
        }

        let total = add_u64(epoch.total_withdraw_requests, shares)?;
        book.epoch_mut(epoch.id)?.total_withdraw_requests = total;
        book.requests.entry(epoch.id).or_default().push(WithdrawRequest {
            user,
            tranche,
            shares,
            epoch_id: epoch.id,
            processed: false,
        });
        self.deps.metrics.withdraw_requests.inc();
        debug!(epoch = %epoch.id, ?tranche, shares, "withdraw requested");
        Ok(epoch.id)
    }

    #[instrument(skip(self, caller))]
    pub fn lock_epoch(&self, caller: &Caller, id: EpochId) -> Result<()> {
        caller.require(Role::Keeper)?;
        let mut book = self.lock()?;
        book.require_current(id)?;
        let epoch = book.epoch_mut(id)?;
        require_state(epoch, EpochState::Open)?;
        epoch.state = EpochState::Locked;
        info!(epoch = %id, "epoch locked");
        Ok(())
    }

    #[instrument(skip(self, caller))]
    pub fn settle_epoch(&self, caller: &Caller, id: EpochId) -> Result<SettlementReport> {
        caller.require(Role::Keeper)?;
        let mut book = self.lock()?;
        book.require_current(id)?;
        require_state(&book.current_epoch()?, EpochState::Locked)?;
        self.settle_locked(&mut book, id)
    }

    /// Locks (if still open) and settles the current epoch once its end time has passed.
    /// Permissionless.
    #[instrument(skip(self))]
    pub fn process_epoch(&self) -> Result<SettlementReport> {
        let mut book = self.lock()?;
        let epoch = book.current_epoch()?;
        let now = self.deps.clock.now_secs();
        if now < epoch.end_time {
            return Err(StrataError::EpochNotEnded {
                epoch: epoch.id.0,
                now,
                end_time: epoch.end_time,
            });
        }
        if epoch.state == EpochState::Open {
            book.epoch_mut(epoch.id)?.state = EpochState::Locked;
            info!(epoch = %epoch.id, "epoch locked by processing");
        }
        self.settle_locked(&mut book, epoch.id)
    }

    fn settle_locked(&self, book: &mut EpochBook, id: EpochId) -> Result<SettlementReport> {
        let harvest = match self.deps.distribution.harvest(&self.identity) {
            Ok(outcome) => Some(outcome),
            Err(StrataError::EmergencyMode) => {
                warn!(epoch = %id, "distribution in emergency mode; settling without harvest");
                None
            }
            Err(e) => return Err(e),
        };

        let mut processed = 0u64;
        let mut redeemed_protected = 0u64;
        let mut redeemed_leveraged = 0u64;
        if let Some(requests) = book.requests.get_mut(&id) {
            for req in requests.iter_mut().filter(|r| !r.processed) {
                let ledger = self.ledger(req.tranche);
                let balance = ledger.balance_of(req.user)?;
                let shares = req.shares.min(balance);
                if shares < req.shares {
                    debug!(
                        user = %req.user,
                        requested = req.shares,
                        balance,
                        "request clamped to current balance"
                    );
                }
                let assets = if shares > 0 {
                    self.redeem_tracked(req.tranche, req.user, shares, req.user)?
                } else {
                    0
                };
                req.processed = true;
                processed += 1;
                match req.tranche {
                    TrancheKind::Protected => {
                        redeemed_protected = add_u64(redeemed_protected, assets)?
                    }
                    TrancheKind::Leveraged => {
                        redeemed_leveraged = add_u64(redeemed_leveraged, assets)?
                    }
                }
            }
        }
        self.deps.metrics.withdrawals_processed.inc_by(processed);

        let penalty_distributed = self.distribute_penalty(book)?;
        let penalty_deferred = book.accumulated_penalty;

        let now = self.deps.clock.now_secs();
        let next = id.next()?;
        let end_time = add_u64(now, book.duration_secs)?;
        book.epoch_mut(id)?.state = EpochState::Settled;
        book.epochs.insert(
            next,
            Epoch {
                id: next,
                start_time: now,
                end_time,
                state: EpochState::Open,
                total_withdraw_requests: 0,
            },
        );
        book.current = next;
        self.deps.metrics.epochs_settled.inc();

        info!(
            epoch = %id,
            next = %next,
            processed,
            redeemed_protected,
            redeemed_leveraged,
            penalty_distributed,
            penalty_deferred,
            "epoch settled"
        );

        Ok(SettlementReport {
            epoch: id,
            harvest,
            requests_processed: processed,
            redeemed_protected,
            redeemed_leveraged,
            penalty_distributed,
            penalty_deferred,
            next_epoch: next,
        })
    }

    /// Hands the pool to the tranches pro rata to their principal. Kept if both are empty.
    fn distribute_penalty(&self, book: &mut EpochBook) -> Result<u64> {
        let pool = book.accumulated_penalty;
        if pool == 0 {
            return Ok(0);
        }
        let protected = self.deps.protected.total_principal()?;
        let leveraged = self.deps.leveraged.total_principal()?;
        let total = add_u64(protected, leveraged)?;
        if total == 0 {
            debug!(pool, "both tranches empty; penalty pool deferred");
            return Ok(0);
        }

        let to_protected = pro_rata(pool, protected, total)?;
        let to_leveraged = pool - to_protected;
        if to_protected > 0 {
            self.deps.protected.credit_yield(&self.identity, to_protected)?;
        }
        if to_leveraged > 0 {
            self.deps.leveraged.credit_yield(&self.identity, to_leveraged)?;
        }
        book.accumulated_penalty = 0;
        self.deps.metrics.penalty_distributed.inc_by(pool);
        debug!(to_protected, to_leveraged, "penalty pool distributed");
        Ok(pool)
    }

    /// Redeems and deregisters the principal the ledger actually released.
    fn redeem_tracked(
        &self,
        tranche: TrancheKind,
        owner: AccountId,
        shares: u64,
        recipient: AccountId,
    ) -> Result<u64> {
        let ledger = self.ledger(tranche);
        let before = ledger.total_principal()?;
        let assets = ledger.redeem(owner, shares, recipient)?;
        let released = before.saturating_sub(ledger.total_principal()?);
        if released > 0 {
            self.deps
                .distribution
                .deregister_principal(&self.identity, tranche, released)?;
        }
        Ok(assets)
    }

    /// Redeems immediately, keeping the penalty in the pool. Available in every epoch state.
    #[instrument(skip(self, caller), fields(user = %caller.account()))]
    pub fn early_withdraw(
        &self,
        caller: &Caller,
        tranche: TrancheKind,
        shares: u64,
    ) -> Result<EarlyWithdrawal> {
        if shares == 0 {
            return Err(StrataError::ZeroAmount);
        }
        let mut book = self.lock()?;
        let user = caller.account();
        let balance = self.ledger(tranche).balance_of(user)?;
        if shares > balance {
            return Err(StrataError::InsufficientShares {
                requested: shares,
                available: balance,
            });
        }

        let quoted = self.ledger(tranche).preview_redeem(shares)?;
        let gross = self.redeem_tracked(tranche, user, shares, self.identity.account())?;
        if gross != quoted {
            debug!(quoted, gross, "redemption differed from preview");
        }
        let penalty = floor_bps(gross, book.early_withdraw_penalty)?;
        let paid = sub_u64(gross, penalty)?;
        if paid > 0 {
            self.deps.payouts.transfer(user, paid)?;
        }
        book.accumulated_penalty = add_u64(book.accumulated_penalty, penalty)?;

        let m = &self.deps.metrics;
        m.early_withdrawals.inc();
        m.penalty_collected.inc_by(penalty);
        info!(?tranche, shares, gross, penalty, paid, "early withdrawal");

        Ok(EarlyWithdrawal {
            shares,
            gross,
            penalty,
            paid,
        })
    }
}

fn check_penalty(penalty: Bps) -> Result<()> {
    if penalty.get() > MAX_EARLY_WITHDRAW_PENALTY_BPS {
        return Err(StrataError::ConfigError(format!(
            "early_withdraw_penalty must be at most {MAX_EARLY_WITHDRAW_PENALTY_BPS}bps"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{InMemoryCustody, InMemoryTranche, ManualClock, ScriptedStrategy};
    use crate::config::DistributionConfig;
    use crate::distribution::DistributionDeps;
    use crate::math::SECONDS_PER_DAY;
    use crate::ErrorKind;

    struct Rig {
        epochs: EpochController,
        distribution: Arc<DistributionController>,
        custody: Arc<InMemoryCustody>,
        protected: Arc<InMemoryTranche>,
        leveraged: Arc<InMemoryTranche>,
        clock: Arc<ManualClock>,
    }

    fn engine() -> Caller {
        Caller::new(
            AccountId::from_label("engine"),
            [Role::Distributor, Role::Vault, Role::Keeper],
        )
    }

    fn keeper() -> Caller {
        Caller::new(AccountId::from_label("keeper"), [Role::Keeper])
    }

    fn admin() -> Caller {
        Caller::new(AccountId::from_label("admin"), [Role::Admin])
    }

    fn vault() -> Caller {
        Caller::new(AccountId::from_label("vault"), [Role::Vault])
    }

    fn rig() -> Rig {
        let custody = Arc::new(InMemoryCustody::new(
            AccountId::from_label("treasury"),
            engine().account(),
        ));
        let protected = Arc::new(InMemoryTranche::new(TrancheKind::Protected, custody.clone()));
        let leveraged = Arc::new(InMemoryTranche::new(TrancheKind::Leveraged, custody.clone()));
        let clock = Arc::new(ManualClock::new(1_000));
        let metrics = Arc::new(EngineMetrics::new());
        let distribution = Arc::new(
            DistributionController::new(
                &DistributionConfig::default(),
                engine(),
                DistributionDeps {
                    protected: protected.clone(),
                    leveraged: leveraged.clone(),
                    strategy: Arc::new(ScriptedStrategy::new(0)),
                    treasury: custody.clone(),
                    rate_source: None,
                    clock: clock.clone(),
                    metrics: metrics.clone(),
                },
            )
            .unwrap(),
        );
        distribution.initialize(&admin()).unwrap();
        let epochs = EpochController::new(
            &EpochConfig::default(),
            engine(),
            EpochDeps {
                distribution: distribution.clone(),
                protected: protected.clone(),
                leveraged: leveraged.clone(),
                payouts: custody.clone(),
                clock: clock.clone(),
                metrics,
            },
        )
        .unwrap();
        Rig {
            epochs,
            distribution,
            custody,
            protected,
            leveraged,
            clock,
        }
    }

    fn deposit(r: &Rig, kind: TrancheKind, who: &str, amount: u64) -> Caller {
        let account = AccountId::from_label(who);
        let tranche = match kind {
            TrancheKind::Protected => &r.protected,
            TrancheKind::Leveraged => &r.leveraged,
        };
        tranche.deposit(account, amount).unwrap();
        r.distribution
            .register_principal(&vault(), kind, amount)
            .unwrap();
        Caller::user(account)
    }

    #[test]
    fn epochs_move_strictly_forward() {
        let r = rig();
        let id = r.epochs.current_epoch().unwrap().id;
        assert_eq!(id, EpochId(1));

        let err = r.epochs.settle_epoch(&keeper(), id).unwrap_err();
        assert!(matches!(
            err,
            StrataError::EpochState {
                expected: EpochState::Locked,
                actual: EpochState::Open,
                ..
            }
        ));

        r.epochs.lock_epoch(&keeper(), id).unwrap();
        assert!(r.epochs.lock_epoch(&keeper(), id).is_err());

        r.clock.advance(60);
        let report = r.epochs.settle_epoch(&keeper(), id).unwrap();
        assert_eq!(report.next_epoch, EpochId(2));
        assert_eq!(r.epochs.epoch(id).unwrap().unwrap().state, EpochState::Settled);

        let err = r.epochs.lock_epoch(&keeper(), id).unwrap_err();
        assert!(matches!(err, StrataError::NotActiveEpoch { epoch: 1, active: 2 }));
        let next = r.epochs.current_epoch().unwrap();
        assert_eq!(next.state, EpochState::Open);
        assert_eq!(next.start_time, 1_060);
        assert_eq!(next.end_time, 1_060 + 7 * SECONDS_PER_DAY);
    }

    #[test]
    fn requests_need_an_open_epoch_and_enough_shares() {
        let r = rig();
        let alice = deposit(&r, TrancheKind::Leveraged, "alice", 1_000);

        assert_eq!(
            r.epochs
                .request_withdraw(&alice, TrancheKind::Leveraged, 0)
                .unwrap_err()
                .kind(),
            ErrorKind::Resource
        );
        r.epochs
            .request_withdraw(&alice, TrancheKind::Leveraged, 600)
            .unwrap();
        // 600 already queued; only 400 left to request.
        assert!(matches!(
            r.epochs.request_withdraw(&alice, TrancheKind::Leveraged, 500),
            Err(StrataError::InsufficientShares {
                requested: 500,
                available: 400
            })
        ));
        assert_eq!(r.epochs.current_epoch().unwrap().total_withdraw_requests, 600);

        r.epochs.lock_epoch(&keeper(), EpochId(1)).unwrap();
        let err = r
            .epochs
            .request_withdraw(&alice, TrancheKind::Leveraged, 100)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sequencing);
    }

    #[test]
    fn settlement_redeems_queued_requests_once() {
        let r = rig();
        let alice = deposit(&r, TrancheKind::Leveraged, "alice", 1_000);
        r.epochs
            .request_withdraw(&alice, TrancheKind::Leveraged, 400)
            .unwrap();

        r.epochs.lock_epoch(&keeper(), EpochId(1)).unwrap();
        let report = r.epochs.settle_epoch(&keeper(), EpochId(1)).unwrap();
        assert_eq!(report.requests_processed, 1);
        assert_eq!(report.redeemed_leveraged, 400);
        assert_eq!(r.custody.balance_of(alice.account()).unwrap(), 400);
        assert_eq!(r.leveraged.balance_of(alice.account()).unwrap(), 600);
        assert_eq!(r.distribution.snapshot().unwrap().leveraged_principal, 600);
        assert!(r.epochs.pending_requests(EpochId(1)).unwrap().is_empty());
        assert!(r.epochs.requests(EpochId(1)).unwrap()[0].processed);

        r.epochs.lock_epoch(&keeper(), EpochId(2)).unwrap();
        let report = r.epochs.settle_epoch(&keeper(), EpochId(2)).unwrap();
        assert_eq!(report.requests_processed, 0);
        assert_eq!(r.custody.balance_of(alice.account()).unwrap(), 400);
    }

    #[test]
    fn process_epoch_waits_for_end_time() {
        let r = rig();
        let err = r.epochs.process_epoch().unwrap_err();
        assert!(matches!(err, StrataError::EpochNotEnded { epoch: 1, .. }));

        r.clock.advance(7 * SECONDS_PER_DAY);
        let report = r.epochs.process_epoch().unwrap();
        assert_eq!(report.epoch, EpochId(1));
        assert_eq!(r.epochs.current_epoch().unwrap().id, EpochId(2));
    }

    #[test]
    fn early_withdraw_charges_penalty_into_pool() {
        let r = rig();
        let bob = deposit(&r, TrancheKind::Leveraged, "bob", 10_000);
        let exit = r
            .epochs
            .early_withdraw(&bob, TrancheKind::Leveraged, 10_000)
            .unwrap();
        assert_eq!(exit.gross, 10_000);
        assert_eq!(exit.penalty, 100);
        assert_eq!(exit.paid, 9_900);
        assert_eq!(r.custody.balance_of(bob.account()).unwrap(), 9_900);
        assert_eq!(r.epochs.accumulated_penalty().unwrap(), 100);
        assert_eq!(r.distribution.snapshot().unwrap().leveraged_principal, 0);
    }

    #[test]
    fn penalty_pool_waits_for_non_empty_tranches() {
        let r = rig();
        let bob = deposit(&r, TrancheKind::Leveraged, "bob", 10_000);
        r.epochs
            .early_withdraw(&bob, TrancheKind::Leveraged, 10_000)
            .unwrap();

        r.clock.advance(7 * SECONDS_PER_DAY);
        let report = r.epochs.process_epoch().unwrap();
        assert_eq!(report.penalty_distributed, 0);
        assert_eq!(report.penalty_deferred, 100);
        assert_eq!(r.epochs.accumulated_penalty().unwrap(), 100);

        deposit(&r, TrancheKind::Leveraged, "carol", 3_000);
        deposit(&r, TrancheKind::Protected, "dave", 1_000);
        r.clock.advance(7 * SECONDS_PER_DAY);
        let report = r.epochs.process_epoch().unwrap();
        assert_eq!(report.penalty_distributed, 100);
        assert_eq!(r.epochs.accumulated_penalty().unwrap(), 0);
        assert_eq!(r.protected.yield_buffer().unwrap(), 25);
    }

    #[test]
    fn early_withdraw_is_available_while_locked() {
        let r = rig();
        let bob = deposit(&r, TrancheKind::Protected, "bob", 500);
        r.epochs.lock_epoch(&keeper(), EpochId(1)).unwrap();
        assert!(r
            .epochs
            .early_withdraw(&bob, TrancheKind::Protected, 500)
            .is_ok());
    }

    #[test]
    fn penalty_setter_is_bounded() {
        let r = rig();
        let too_high = Bps::new(5_001).unwrap();
        assert!(r.epochs.set_early_withdraw_penalty(&admin(), too_high).is_err());
        assert!(r
            .epochs
            .set_early_withdraw_penalty(&keeper(), Bps::new(50).unwrap())
            .is_err());
        r.epochs
            .set_early_withdraw_penalty(&admin(), Bps::new(50).unwrap())
            .unwrap();
        assert_eq!(r.epochs.early_withdraw_penalty().unwrap().get(), 50);
    }
}
