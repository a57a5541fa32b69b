//! Configuration for the strata engine.
//!
//! # Configuration Sources
//!
//! - Environment variables (prefixed with `STRATA_`)
//! - JSON documents (`from_json_str`; missing fields take their defaults)
//! - Programmatic defaults and the builder
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_core::config::StrataConfig;
//!
//! let config = StrataConfig::builder()
//!     .base_rate(Bps::new(500)?)
//!     .epoch_duration_secs(86_400)
//!     .build()?;
//! ```

use serde::{Deserialize, Serialize};

use crate::safety::{LevelPolicy, SafetyLevel, SafetyThresholds};
use crate::types::Bps;
use crate::{Result, StrataError};

/// Upper bound on the protocol fee share of profit.
pub const MAX_PROTOCOL_FEE_BPS: u16 = 2_000;

/// Upper bound on the early-exit penalty.
pub const MAX_EARLY_WITHDRAW_PENALTY_BPS: u16 = 5_000;

/// Complete engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub distribution: DistributionConfig,
    pub safety: SafetyConfig,
    pub epoch: EpochConfig,
    pub logging: LoggingConfig,
}

impl StrataConfig {
    pub fn builder() -> StrataConfigBuilder {
        StrataConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Recognised variables:
    /// - `STRATA_BASE_RATE_BPS`, `STRATA_MIN_RATE_BPS`, `STRATA_MAX_RATE_BPS`
    /// - `STRATA_PROTOCOL_FEE_BPS`
    /// - `STRATA_AUTO_PAUSE` (`true`/`false`)
    /// - `STRATA_EPOCH_DURATION_SECS`
    /// - `STRATA_EARLY_WITHDRAW_PENALTY_BPS`
    /// - `STRATA_LOG_LEVEL`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("STRATA_BASE_RATE_BPS") {
            config.distribution.base_rate = parse_bps("STRATA_BASE_RATE_BPS", &v)?;
        }
        if let Some(v) = lookup("STRATA_MIN_RATE_BPS") {
            config.distribution.min_rate = parse_bps("STRATA_MIN_RATE_BPS", &v)?;
        }
        if let Some(v) = lookup("STRATA_MAX_RATE_BPS") {
            config.distribution.max_rate = parse_bps("STRATA_MAX_RATE_BPS", &v)?;
        }
        if let Some(v) = lookup("STRATA_PROTOCOL_FEE_BPS") {
            config.distribution.protocol_fee = parse_bps("STRATA_PROTOCOL_FEE_BPS", &v)?;
        }
        if let Some(v) = lookup("STRATA_AUTO_PAUSE") {
            config.safety.auto_pause = v.parse().map_err(|e| {
                StrataError::ConfigError(format!("Invalid STRATA_AUTO_PAUSE: {}", e))
            })?;
        }
        if let Some(v) = lookup("STRATA_EPOCH_DURATION_SECS") {
            config.epoch.duration_secs = v.parse().map_err(|e| {
                StrataError::ConfigError(format!("Invalid STRATA_EPOCH_DURATION_SECS: {}", e))
            })?;
        }
        if let Some(v) = lookup("STRATA_EARLY_WITHDRAW_PENALTY_BPS") {
            config.epoch.early_withdraw_penalty =
                parse_bps("STRATA_EARLY_WITHDRAW_PENALTY_BPS", &v)?;
        }
        if let Some(level) = lookup("STRATA_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: StrataConfig = serde_json::from_str(json)
            .map_err(|e| StrataError::ConfigError(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.distribution;
        if !(d.min_rate <= d.base_rate && d.base_rate <= d.max_rate) {
            return Err(StrataError::ConfigError(format!(
                "rate bounds must satisfy min <= base <= max (got {} / {} / {})",
                d.min_rate, d.base_rate, d.max_rate
            )));
        }
        if d.protocol_fee.get() > MAX_PROTOCOL_FEE_BPS {
            return Err(StrataError::ConfigError(format!(
                "protocol_fee must be at most {MAX_PROTOCOL_FEE_BPS}bps"
            )));
        }

        self.safety.thresholds.validate()?;

        if self.epoch.duration_secs == 0 {
            return Err(StrataError::ConfigError(
                "epoch duration_secs must be greater than 0".into(),
            ));
        }
        if self.epoch.early_withdraw_penalty.get() > MAX_EARLY_WITHDRAW_PENALTY_BPS {
            return Err(StrataError::ConfigError(format!(
                "early_withdraw_penalty must be at most {MAX_EARLY_WITHDRAW_PENALTY_BPS}bps"
            )));
        }

        Ok(())
    }
}

fn parse_bps(var: &str, value: &str) -> Result<Bps> {
    let raw: u16 = value
        .parse()
        .map_err(|e| StrataError::ConfigError(format!("Invalid {}: {}", var, e)))?;
    Bps::new(raw)
}

/// Fixed-rate and fee settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Rate paid while the buffer is healthy.
    pub base_rate: Bps,
    /// Floor applied to every derived rate.
    pub min_rate: Bps,
    /// Ceiling applied to derived and externally sourced rates.
    pub max_rate: Bps,
    /// Share of positive profit routed to the treasury before the waterfall.
    pub protocol_fee: Bps,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            base_rate: Bps::saturating_from_u64(500),
            min_rate: Bps::saturating_from_u64(200),
            max_rate: Bps::saturating_from_u64(1_500),
            protocol_fee: Bps::saturating_from_u64(100),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub thresholds: SafetyThresholds,
    /// Pause both deposit sides on entering `Critical`.
    pub auto_pause: bool,
    /// Indexed by `SafetyLevel::index()`.
    pub policies: [LevelPolicy; 5],
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            thresholds: SafetyThresholds::default(),
            auto_pause: true,
            policies: LevelPolicy::defaults(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochConfig {
    pub duration_secs: u64,
    pub early_withdraw_penalty: Bps,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            duration_secs: 7 * crate::math::SECONDS_PER_DAY,
            early_withdraw_penalty: Bps::saturating_from_u64(100),
        }
    }
}

/// Logging configuration. The library never installs a subscriber; hosts read this.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or env-filter directive (e.g. `info`, `strata_core=debug`).
    pub level: String,
    pub json_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json_output: false,
        }
    }
}

/// Builder for StrataConfig.
#[derive(Default)]
pub struct StrataConfigBuilder {
    config: StrataConfig,
}

impl StrataConfigBuilder {
    pub fn base_rate(mut self, rate: Bps) -> Self {
        self.config.distribution.base_rate = rate;
        self
    }

    pub fn rate_bounds(mut self, min: Bps, max: Bps) -> Self {
        self.config.distribution.min_rate = min;
        self.config.distribution.max_rate = max;
        self
    }

    pub fn protocol_fee(mut self, fee: Bps) -> Self {
        self.config.distribution.protocol_fee = fee;
        self
    }

    pub fn thresholds(mut self, thresholds: SafetyThresholds) -> Self {
        self.config.safety.thresholds = thresholds;
        self
    }

    pub fn auto_pause(mut self, enabled: bool) -> Self {
        self.config.safety.auto_pause = enabled;
        self
    }

    pub fn level_policy(mut self, level: SafetyLevel, policy: LevelPolicy) -> Self {
        self.config.safety.policies[level.index()] = policy;
        self
    }

    pub fn epoch_duration_secs(mut self, secs: u64) -> Self {
        self.config.epoch.duration_secs = secs;
        self
    }

    pub fn early_withdraw_penalty(mut self, penalty: Bps) -> Self {
        self.config.epoch.early_withdraw_penalty = penalty;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn json_logs(mut self, enabled: bool) -> Self {
        self.config.logging.json_output = enabled;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<StrataConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
