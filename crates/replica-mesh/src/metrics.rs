//! Per-peer performance metrics maintained by the health monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::ProbeOutcome;

/// Success-rate points gained per healthy probe.
pub const SUCCESS_RATE_REWARD: f64 = 5.0;

/// Success-rate points lost per degraded probe.
pub const SUCCESS_RATE_DEGRADED_PENALTY: f64 = 5.0;

/// Success-rate points lost per unreachable probe.
pub const SUCCESS_RATE_UNREACHABLE_PENALTY: f64 = 10.0;

/// Measured performance of one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Last measured round-trip latency.
    pub latency_ms: f64,
    /// Heuristic success rate, 0..=100.
    pub success_rate: f64,
    /// Observed upload throughput.
    pub upload_bps: u64,
    /// Observed download throughput.
    pub download_bps: u64,
    /// When the peer was last probed, `None` if never.
    pub last_measured: Option<DateTime<Utc>>,
}

impl PerformanceMetrics {
    /// Creates metrics for a peer that has not been probed yet.
    ///
    /// An unprobed peer is assumed healthy, like a fresh connection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            latency_ms: 0.0,
            success_rate: 100.0,
            upload_bps: 0,
            download_bps: 0,
            last_measured: None,
        }
    }

    /// Folds one probe outcome into the metrics.
    pub fn record(&mut self, outcome: &ProbeOutcome, at: DateTime<Utc>) {
        match outcome {
            ProbeOutcome::Healthy { latency } => {
                self.latency_ms = latency.as_secs_f64() * 1000.0;
                self.success_rate += SUCCESS_RATE_REWARD;
            }
            ProbeOutcome::Degraded { latency } => {
                self.latency_ms = latency.as_secs_f64() * 1000.0;
                self.success_rate -= SUCCESS_RATE_DEGRADED_PENALTY;
            }
            ProbeOutcome::Unreachable => {
                self.success_rate -= SUCCESS_RATE_UNREACHABLE_PENALTY;
            }
        }
        self.success_rate = self.success_rate.clamp(0.0, 100.0);
        self.last_measured = Some(at);
    }

    /// Returns true if the peer has been probed at least once.
    #[must_use]
    pub const fn is_measured(&self) -> bool {
        self.last_measured.is_some()
    }
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
