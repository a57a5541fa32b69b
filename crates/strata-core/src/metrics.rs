//! Engine activity metrics.
//!
//! Lock-free counters and gauges shared by the controllers through an `Arc<EngineMetrics>`.
//! Nothing here feeds back into engine decisions.

use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Metric Types
// =============================================================================

/// A counter that can only increase.
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Last-written value.
#[derive(Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Engine Metrics
// =============================================================================

#[derive(Default)]
pub struct EngineMetrics {
    // Distribution
    pub harvests_total: Counter,
    pub harvests_skipped: Counter,
    pub emergency_activations: Counter,
    pub protocol_fees_total: Counter,
    pub protected_yield_total: Counter,
    pub leveraged_yield_total: Counter,
    pub slashed_total: Counter,
    pub rate_changes: Counter,

    // Safety
    pub level_transitions: Counter,
    pub auto_pauses: Counter,
    pub deposit_rejections: Counter,

    // Epochs
    pub withdraw_requests: Counter,
    pub withdrawals_processed: Counter,
    pub early_withdrawals: Counter,
    pub epochs_settled: Counter,
    pub penalty_collected: Counter,
    pub penalty_distributed: Counter,

    // Gauges
    pub safety_level: Gauge,
    pub fixed_rate_bps: Gauge,
    pub buffer_ratio_bps: Gauge,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export metrics as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "counters": {
                "harvests_total": self.harvests_total.get(),
                "harvests_skipped": self.harvests_skipped.get(),
                "emergency_activations": self.emergency_activations.get(),
                "protocol_fees_total": self.protocol_fees_total.get(),
                "protected_yield_total": self.protected_yield_total.get(),
                "leveraged_yield_total": self.leveraged_yield_total.get(),
                "slashed_total": self.slashed_total.get(),
                "rate_changes": self.rate_changes.get(),
                "level_transitions": self.level_transitions.get(),
                "auto_pauses": self.auto_pauses.get(),
                "deposit_rejections": self.deposit_rejections.get(),
                "withdraw_requests": self.withdraw_requests.get(),
                "withdrawals_processed": self.withdrawals_processed.get(),
                "early_withdrawals": self.early_withdrawals.get(),
                "epochs_settled": self.epochs_settled.get(),
                "penalty_collected": self.penalty_collected.get(),
                "penalty_distributed": self.penalty_distributed.get(),
            },
            "gauges": {
                "safety_level": self.safety_level.get(),
                "fixed_rate_bps": self.fixed_rate_bps.get(),
                "buffer_ratio_bps": self.buffer_ratio_bps.get(),
            },
        })
    }
}
