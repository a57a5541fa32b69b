//! Strata core: a two-tranche structured-yield engine.
//!
//! Pooled capital is split into a protected tranche (fixed-rate obligation, paid first) and a
//! leveraged tranche (first loss, residual yield). This crate implements the parts that must
//! agree on the shared principal/ratio state:
//!
//! - `math` / `waterfall`: pure rate math and the priority waterfall
//! - `rate_model` / `safety`: dynamic fixed rate and risk classification with deposit gating
//! - `distribution`: harvest orchestration over the tranche ledgers
//! - `epoch`: epoch-batched withdrawals with early-exit penalties
//!
//! The core is IO-free: custody, share tokens, yield generation and time are collaborators
//! behind the traits in this module.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod access;
pub mod components;
pub mod config;
pub mod distribution;
pub mod epoch;
pub mod hash;
pub mod math;
pub mod metrics;
pub mod rate_model;
pub mod safety;
pub mod types;
pub mod waterfall;

pub use access::{Caller, Role};
pub use config::StrataConfig;
pub use distribution::{
    DistributionController, DistributionDeps, DistributionSnapshot, HarvestOutcome, HarvestReport,
};
pub use epoch::{
    EarlyWithdrawal, Epoch, EpochController, EpochDeps, EpochState, SettlementReport,
    WithdrawRequest,
};
pub use rate_model::RateModel;
pub use safety::{
    DepositCheck, DepositRejection, LevelPolicy, SafetyController, SafetyLevel, SafetyThresholds,
};
pub use types::{AccountId, Bps, EpochId, TrancheKind};
pub use waterfall::{DistributionResult, WaterfallInput};

/// 32-byte hash newtype used for account identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Coarse classification of a rejection so callers can decide whether to retry, escalate or
/// report it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Operation invoked in the wrong lifecycle state (programming/sequencing error).
    Sequencing,
    /// Amount-level problem: zero amounts, more shares than held.
    Resource,
    /// Rejected by safety policy (deposit gating).
    Policy,
    /// Caller lacks the capability for the operation.
    Authorization,
    /// Invalid static configuration.
    Configuration,
    /// Checked arithmetic overflowed.
    Arithmetic,
    /// An external collaborator failed; the call is aborted without rollback.
    Collaborator,
}

/// Unified error type for the strata engine.
#[derive(Debug, Error)]
pub enum StrataError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bounded value exceeded: {0}")]
    BoundedValueExceeded(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Controller already initialized")]
    AlreadyInitialized,

    #[error("Controller not initialized")]
    NotInitialized,

    #[error("Emergency mode is active; harvests are blocked until cleared")]
    EmergencyMode,

    #[error("Epoch {epoch} is {actual:?}, expected {expected:?}")]
    EpochState {
        epoch: u64,
        expected: EpochState,
        actual: EpochState,
    },

    #[error("Epoch {epoch} is not the active epoch (active: {active})")]
    NotActiveEpoch { epoch: u64, active: u64 },

    #[error("Epoch {epoch} has not ended: now {now}, ends at {end_time}")]
    EpochNotEnded { epoch: u64, now: u64, end_time: u64 },

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Insufficient shares: requested {requested}, available {available}")]
    InsufficientShares { requested: u64, available: u64 },

    #[error("Deposit rejected: {0}")]
    DepositRejected(DepositRejection),

    #[error("Unauthorized: {account} lacks role {required:?}")]
    Unauthorized { account: String, required: Role },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Collaborator failure: {0}")]
    Collaborator(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl StrataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrataError::InvalidState(_)
            | StrataError::AlreadyInitialized
            | StrataError::NotInitialized
            | StrataError::EmergencyMode
            | StrataError::EpochState { .. }
            | StrataError::NotActiveEpoch { .. }
            | StrataError::EpochNotEnded { .. }
            | StrataError::LockPoisoned(_) => ErrorKind::Sequencing,
            StrataError::InvalidInput(_)
            | StrataError::ZeroAmount
            | StrataError::InsufficientShares { .. } => ErrorKind::Resource,
            StrataError::DepositRejected(_) => ErrorKind::Policy,
            StrataError::Unauthorized { .. } => ErrorKind::Authorization,
            StrataError::ConfigError(_) => ErrorKind::Configuration,
            StrataError::BoundedValueExceeded(_) => ErrorKind::Arithmetic,
            StrataError::Collaborator(_) => ErrorKind::Collaborator,
        }
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;

// =============================================================================
// Collaborator contracts
// =============================================================================

/// Accounting surface of one tranche vault.
///
/// The engine never moves tokens itself; it instructs the ledger and reads back totals.
pub trait TrancheLedger: Send + Sync {
    /// Adds `amount` to the tranche's yield. Outstanding slash deficit is recovered first.
    ///
    /// Fails if `caller` is not authorized to distribute.
    fn credit_yield(&self, caller: &Caller, amount: u64) -> Result<()>;

    /// Removes up to `amount` from the tranche, drawing on the yield buffer before principal.
    ///
    /// Postconditions:
    /// - returns the amount actually removed (`<= amount`)
    /// - any unfunded remainder is added to the tranche's slash deficit
    fn slash_principal(&self, caller: &Caller, amount: u64) -> Result<u64>;

    /// Installs the fixed rate owed to holders. Only meaningful on the protected tranche.
    fn set_fixed_rate(&self, caller: &Caller, rate: Bps) -> Result<()>;

    fn total_principal(&self) -> Result<u64>;

    /// Everything `slash_principal` can draw on: principal plus retained yield.
    fn loss_capacity(&self) -> Result<u64>;

    fn balance_of(&self, account: AccountId) -> Result<u64>;

    fn preview_redeem(&self, shares: u64) -> Result<u64>;

    /// Burns `shares` held by `owner` and pays the redeemed assets to `recipient`.
    fn redeem(&self, owner: AccountId, shares: u64, recipient: AccountId) -> Result<u64>;
}

/// External capital-deployment strategy producing the yield that is distributed.
pub trait YieldStrategy: Send + Sync {
    /// Realizes profit (positive) or loss (negative) since the previous harvest.
    fn harvest(&self) -> Result<i128>;

    fn total_assets(&self) -> Result<u64>;

    fn deposit(&self, amount: u64) -> Result<()>;

    /// Recalls up to `amount`; returns the amount actually recalled.
    fn withdraw(&self, amount: u64) -> Result<u64>;
}

/// Source of a target fixed rate. Only read on an explicit sync.
pub trait RateSource: Send + Sync {
    fn target_rate(&self) -> Result<Bps>;
}

/// Protocol fee sink and emergency sweep target.
pub trait Treasury: Send + Sync {
    fn receive(&self, amount: u64) -> Result<()>;
}

/// Moves assets held by the engine to an account.
pub trait Payouts: Send + Sync {
    fn transfer(&self, to: AccountId, amount: u64) -> Result<()>;
}

/// Wall-clock source in unix seconds.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// Live view of both tranche principals: `(protected, leveraged)`.
pub trait PrincipalSource: Send + Sync {
    fn principals(&self) -> Result<(u64, u64)>;
}
