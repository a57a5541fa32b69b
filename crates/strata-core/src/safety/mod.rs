//! Risk classification and deposit gating.

mod classifier;
mod controller;

pub use classifier::{classify, SafetyLevel, SafetyThresholds};
pub use controller::{DepositCheck, DepositRejection, LevelPolicy, SafetyController};
