//! In-memory implementations of the collaborator traits defined in lib.rs.
//!
//! Useful for testing, simulation, and wiring a complete engine without external systems.
//! None of the controllers depend on these types.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::access::{Caller, Role};
use crate::math::{add_u64, mul_div_floor_u64, pro_rata, sub_u64};
use crate::types::{AccountId, Bps, TrancheKind};
use crate::{
    Clock, Payouts, RateSource, Result, StrataError, TrancheLedger, Treasury, YieldStrategy,
};

// =============================================================================
// InMemoryCustody
// =============================================================================

/// Asset balances per account.
///
/// Treasury receipts land on the `treasury` account. Payouts are debited from the `escrow`
/// account, which is where engine-initiated redemptions deposit their proceeds.
pub struct InMemoryCustody {
    treasury: AccountId,
    escrow: AccountId,
    balances: Mutex<BTreeMap<AccountId, u64>>,
}

impl InMemoryCustody {
    pub fn new(treasury: AccountId, escrow: AccountId) -> Self {
        Self {
            treasury,
            escrow,
            balances: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<AccountId, u64>>> {
        self.balances
            .lock()
            .map_err(|_| StrataError::LockPoisoned("custody"))
    }

    pub fn treasury(&self) -> AccountId {
        self.treasury
    }

    pub fn escrow(&self) -> AccountId {
        self.escrow
    }

    pub fn balance_of(&self, account: AccountId) -> Result<u64> {
        Ok(self.lock()?.get(&account).copied().unwrap_or(0))
    }

    pub fn credit(&self, account: AccountId, amount: u64) -> Result<()> {
        let mut balances = self.lock()?;
        let entry = balances.entry(account).or_insert(0);
        *entry = add_u64(*entry, amount)?;
        Ok(())
    }

    pub fn debit(&self, account: AccountId, amount: u64) -> Result<()> {
        let mut balances = self.lock()?;
        let held = balances.get(&account).copied().unwrap_or(0);
        if held < amount {
            return Err(StrataError::Collaborator(format!(
                "custody: {account} holds {held}, cannot debit {amount}"
            )));
        }
        balances.insert(account, held - amount);
        Ok(())
    }
}

impl Treasury for InMemoryCustody {
    fn receive(&self, amount: u64) -> Result<()> {
        self.credit(self.treasury, amount)
    }
}

impl Payouts for InMemoryCustody {
    fn transfer(&self, to: AccountId, amount: u64) -> Result<()> {
        self.debit(self.escrow, amount)?;
        self.credit(to, amount)
    }
}

// =============================================================================
// InMemoryTranche
// =============================================================================

#[derive(Debug, Default)]
struct TrancheBook {
    principal: u64,
    yield_buffer: u64,
    slash_deficit: u64,
    fixed_rate: Bps,
    shares: BTreeMap<AccountId, u64>,
    total_shares: u64,
}

impl TrancheBook {
    fn total_assets(&self) -> Result<u64> {
        add_u64(self.principal, self.yield_buffer)
    }

    fn preview_redeem(&self, shares: u64) -> Result<u64> {
        if self.total_shares == 0 {
            return Ok(0);
        }
        mul_div_floor_u64(shares, self.total_assets()?, self.total_shares)
    }
}

/// Share-accounted tranche vault.
///
/// Assets are split into principal and a yield buffer. Slashes consume yield before principal;
/// any unfunded remainder becomes a deficit that later yield credits repay into principal first.
pub struct InMemoryTranche {
    kind: TrancheKind,
    custody: Arc<InMemoryCustody>,
    book: Mutex<TrancheBook>,
}

impl InMemoryTranche {
    pub fn new(kind: TrancheKind, custody: Arc<InMemoryCustody>) -> Self {
        Self {
            kind,
            custody,
            book: Mutex::new(TrancheBook::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, TrancheBook>> {
        self.book
            .lock()
            .map_err(|_| StrataError::LockPoisoned("tranche ledger"))
    }

    pub fn kind(&self) -> TrancheKind {
        self.kind
    }

    /// Mints shares for `assets`; 1:1 while the tranche is empty.
    pub fn deposit(&self, owner: AccountId, assets: u64) -> Result<u64> {
        if assets == 0 {
            return Err(StrataError::ZeroAmount);
        }
        let mut book = self.lock()?;
        let total_assets = book.total_assets()?;
        let minted = if book.total_shares == 0 || total_assets == 0 {
            assets
        } else {
            mul_div_floor_u64(assets, book.total_shares, total_assets)?
        };
        if minted == 0 {
            return Err(StrataError::InvalidInput(format!(
                "deposit of {assets} mints no shares"
            )));
        }
        book.principal = add_u64(book.principal, assets)?;
        book.total_shares = add_u64(book.total_shares, minted)?;
        let held = book.shares.entry(owner).or_insert(0);
        *held = add_u64(*held, minted)?;
        debug!(tranche = ?self.kind, %owner, assets, minted, "deposit");
        Ok(minted)
    }

    pub fn total_assets(&self) -> Result<u64> {
        self.lock()?.total_assets()
    }

    pub fn total_shares(&self) -> Result<u64> {
        Ok(self.lock()?.total_shares)
    }

    pub fn yield_buffer(&self) -> Result<u64> {
        Ok(self.lock()?.yield_buffer)
    }

    pub fn slash_deficit(&self) -> Result<u64> {
        Ok(self.lock()?.slash_deficit)
    }

    pub fn fixed_rate(&self) -> Result<Bps> {
        Ok(self.lock()?.fixed_rate)
    }
}

impl TrancheLedger for InMemoryTranche {
    fn credit_yield(&self, caller: &Caller, amount: u64) -> Result<()> {
        caller.require(Role::Distributor)?;
        let mut book = self.lock()?;
        let recovered = amount.min(book.slash_deficit);
        book.slash_deficit -= recovered;
        book.principal = add_u64(book.principal, recovered)?;
        book.yield_buffer = add_u64(book.yield_buffer, amount - recovered)?;
        debug!(tranche = ?self.kind, amount, recovered, "yield credited");
        Ok(())
    }

    fn slash_principal(&self, caller: &Caller, amount: u64) -> Result<u64> {
        caller.require(Role::Distributor)?;
        let mut book = self.lock()?;
        let from_yield = amount.min(book.yield_buffer);
        let rest = amount - from_yield;
        let from_principal = rest.min(book.principal);
        let unfunded = rest - from_principal;

        book.yield_buffer -= from_yield;
        book.principal -= from_principal;
        book.slash_deficit = add_u64(book.slash_deficit, unfunded)?;
        debug!(
            tranche = ?self.kind,
            amount, from_yield, from_principal, unfunded, "principal slashed"
        );
        Ok(from_yield + from_principal)
    }

    fn set_fixed_rate(&self, caller: &Caller, rate: Bps) -> Result<()> {
        caller.require(Role::Distributor)?;
        self.lock()?.fixed_rate = rate;
        Ok(())
    }

    fn total_principal(&self) -> Result<u64> {
        Ok(self.lock()?.principal)
    }

    fn loss_capacity(&self) -> Result<u64> {
        self.lock()?.total_assets()
    }

    fn balance_of(&self, account: AccountId) -> Result<u64> {
        Ok(self.lock()?.shares.get(&account).copied().unwrap_or(0))
    }

    fn preview_redeem(&self, shares: u64) -> Result<u64> {
        self.lock()?.preview_redeem(shares)
    }

    fn redeem(&self, owner: AccountId, shares: u64, recipient: AccountId) -> Result<u64> {
        let assets = {
            let mut book = self.lock()?;
            let held = book.shares.get(&owner).copied().unwrap_or(0);
            if held < shares {
                return Err(StrataError::InsufficientShares {
                    requested: shares,
                    available: held,
                });
            }
            let total_assets = book.total_assets()?;
            let assets = book.preview_redeem(shares)?;
            let from_principal = pro_rata(assets, book.principal, total_assets)?;
            book.principal = sub_u64(book.principal, from_principal)?;
            book.yield_buffer = sub_u64(book.yield_buffer, assets - from_principal)?;
            book.total_shares -= shares;
            if held == shares {
                book.shares.remove(&owner);
            } else {
                book.shares.insert(owner, held - shares);
            }
            assets
        };
        self.custody.credit(recipient, assets)?;
        debug!(tranche = ?self.kind, %owner, %recipient, shares, assets, "redeemed");
        Ok(assets)
    }
}

// =============================================================================
// ScriptedStrategy
// =============================================================================

#[derive(Debug, Default)]
struct StrategyBook {
    results: VecDeque<i128>,
    assets: u64,
    failing: bool,
}

/// Strategy that replays queued harvest results. An empty queue harvests zero.
#[derive(Default)]
pub struct ScriptedStrategy {
    book: Mutex<StrategyBook>,
}

impl ScriptedStrategy {
    pub fn new(assets: u64) -> Self {
        Self {
            book: Mutex::new(StrategyBook {
                assets,
                ..StrategyBook::default()
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StrategyBook>> {
        self.book
            .lock()
            .map_err(|_| StrataError::LockPoisoned("scripted strategy"))
    }

    pub fn push_result(&self, profit: i128) -> Result<()> {
        self.lock()?.results.push_back(profit);
        Ok(())
    }

    /// While set, every call fails with a collaborator error.
    pub fn set_failing(&self, failing: bool) -> Result<()> {
        self.lock()?.failing = failing;
        Ok(())
    }

    fn check(book: &StrategyBook) -> Result<()> {
        if book.failing {
            Err(StrataError::Collaborator("strategy unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl YieldStrategy for ScriptedStrategy {
    fn harvest(&self) -> Result<i128> {
        let mut book = self.lock()?;
        Self::check(&book)?;
        let result = book.results.pop_front().unwrap_or(0);
        let magnitude = u64::try_from(result.unsigned_abs()).unwrap_or(u64::MAX);
        book.assets = if result >= 0 {
            book.assets.saturating_add(magnitude)
        } else {
            book.assets.saturating_sub(magnitude)
        };
        Ok(result)
    }

    fn total_assets(&self) -> Result<u64> {
        let book = self.lock()?;
        Self::check(&book)?;
        Ok(book.assets)
    }

    fn deposit(&self, amount: u64) -> Result<()> {
        let mut book = self.lock()?;
        Self::check(&book)?;
        book.assets = add_u64(book.assets, amount)?;
        Ok(())
    }

    fn withdraw(&self, amount: u64) -> Result<u64> {
        let mut book = self.lock()?;
        Self::check(&book)?;
        let out = amount.min(book.assets);
        book.assets -= out;
        Ok(out)
    }
}

// =============================================================================
// Rate source and clocks
// =============================================================================

/// Rate source returning an adjustable constant.
pub struct FixedRateSource {
    rate: AtomicU16,
}

impl FixedRateSource {
    pub fn new(rate: Bps) -> Self {
        Self {
            rate: AtomicU16::new(rate.get()),
        }
    }

    pub fn set(&self, rate: Bps) {
        self.rate.store(rate.get(), Ordering::Relaxed);
    }
}

impl RateSource for FixedRateSource {
    fn target_rate(&self) -> Result<Bps> {
        Bps::new(self.rate.load(Ordering::Relaxed))
    }
}

/// Clock advanced explicitly by the test or simulation driving it.
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(start_secs),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::Relaxed);
    }

    pub fn set(&self, secs: u64) {
        self.now.store(secs, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distributor() -> Caller {
        Caller::new(AccountId::from_label("distributor"), [Role::Distributor])
    }

    fn setup() -> (Arc<InMemoryCustody>, InMemoryTranche) {
        let custody = Arc::new(InMemoryCustody::new(
            AccountId::from_label("treasury"),
            AccountId::from_label("escrow"),
        ));
        let tranche = InMemoryTranche::new(TrancheKind::Leveraged, custody.clone());
        (custody, tranche)
    }

    #[test]
    fn slash_draws_yield_then_principal_then_records_deficit() {
        let (_, t) = setup();
        let alice = AccountId::from_label("alice");
        t.deposit(alice, 1_000).unwrap();
        t.credit_yield(&distributor(), 100).unwrap();

        assert_eq!(t.slash_principal(&distributor(), 300).unwrap(), 300);
        assert_eq!(t.yield_buffer().unwrap(), 0);
        assert_eq!(t.total_principal().unwrap(), 800);

        assert_eq!(t.slash_principal(&distributor(), 1_000).unwrap(), 800);
        assert_eq!(t.total_principal().unwrap(), 0);
        assert_eq!(t.slash_deficit().unwrap(), 200);
    }

    #[test]
    fn loss_capacity_counts_retained_yield() {
        let (_, t) = setup();
        t.deposit(AccountId::from_label("alice"), 5_000).unwrap();
        t.credit_yield(&distributor(), 1_000).unwrap();
        assert_eq!(t.total_principal().unwrap(), 5_000);
        assert_eq!(t.loss_capacity().unwrap(), 6_000);

        assert_eq!(t.slash_principal(&distributor(), 6_000).unwrap(), 6_000);
        assert_eq!(t.loss_capacity().unwrap(), 0);
        assert_eq!(t.slash_deficit().unwrap(), 0);
    }

    #[test]
    fn yield_repays_deficit_into_principal_first() {
        let (_, t) = setup();
        t.deposit(AccountId::from_label("alice"), 500).unwrap();
        t.slash_principal(&distributor(), 700).unwrap();
        assert_eq!(t.slash_deficit().unwrap(), 200);

        t.credit_yield(&distributor(), 250).unwrap();
        assert_eq!(t.slash_deficit().unwrap(), 0);
        assert_eq!(t.total_principal().unwrap(), 200);
        assert_eq!(t.yield_buffer().unwrap(), 50);
    }

    #[test]
    fn mutations_require_distributor() {
        let (_, t) = setup();
        let user = Caller::user(AccountId::from_label("mallory"));
        assert!(t.credit_yield(&user, 1).is_err());
        assert!(t.slash_principal(&user, 1).is_err());
        assert!(t.set_fixed_rate(&user, Bps::ZERO).is_err());
    }

    #[test]
    fn deposit_then_redeem_returns_the_deposit() {
        let (custody, t) = setup();
        let alice = AccountId::from_label("alice");
        let shares = t.deposit(alice, 10_000).unwrap();
        assert_eq!(t.preview_redeem(shares).unwrap(), 10_000);

        assert_eq!(t.redeem(alice, shares, alice).unwrap(), 10_000);
        assert_eq!(custody.balance_of(alice).unwrap(), 10_000);
        assert_eq!(t.total_shares().unwrap(), 0);
        assert_eq!(t.total_assets().unwrap(), 0);
    }

    #[test]
    fn redeem_shares_yield_proportionally() {
        let (_, t) = setup();
        let alice = AccountId::from_label("alice");
        let bob = AccountId::from_label("bob");
        t.deposit(alice, 1_000).unwrap();
        t.deposit(bob, 1_000).unwrap();
        t.credit_yield(&distributor(), 200).unwrap();

        assert_eq!(t.redeem(alice, 1_000, alice).unwrap(), 1_100);
        assert_eq!(t.total_principal().unwrap(), 1_000);
        assert_eq!(t.yield_buffer().unwrap(), 100);
    }

    #[test]
    fn redeem_more_than_held_is_rejected() {
        let (_, t) = setup();
        let alice = AccountId::from_label("alice");
        t.deposit(alice, 10).unwrap();
        assert!(matches!(
            t.redeem(alice, 11, alice),
            Err(StrataError::InsufficientShares {
                requested: 11,
                available: 10
            })
        ));
    }

    #[test]
    fn payouts_move_funds_out_of_escrow() {
        let (custody, _) = setup();
        let alice = AccountId::from_label("alice");
        custody.credit(custody.escrow(), 100).unwrap();
        custody.transfer(alice, 60).unwrap();
        assert_eq!(custody.balance_of(alice).unwrap(), 60);
        assert_eq!(custody.balance_of(custody.escrow()).unwrap(), 40);
        assert!(custody.transfer(alice, 41).is_err());
    }

    #[test]
    fn scripted_strategy_replays_and_fails_on_demand() {
        let s = ScriptedStrategy::new(1_000);
        s.push_result(50).unwrap();
        s.push_result(-20).unwrap();
        assert_eq!(s.harvest().unwrap(), 50);
        assert_eq!(s.harvest().unwrap(), -20);
        assert_eq!(s.harvest().unwrap(), 0);
        assert_eq!(s.total_assets().unwrap(), 1_030);

        s.set_failing(true).unwrap();
        assert!(matches!(s.harvest(), Err(StrataError::Collaborator(_))));
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let c = ManualClock::new(100);
        c.advance(50);
        assert_eq!(c.now_secs(), 150);
        c.set(10);
        assert_eq!(c.now_secs(), 10);
    }
}
