//! Trust and suitability scoring.
//!
//! Everything here is pure: the catalog and health monitor call into it with
//! the current state and write back whatever it returns.

use crate::metrics::PerformanceMetrics;
use crate::peer::{Classification, Peer, TrustScore};
use crate::probe::ProbeOutcome;

/// Upper bound of [`TrustScorer::suitability_score`].
pub const MAX_SUITABILITY: f64 = 200.0;

/// Minimum trust for a peer to hold replicas.
pub const SUITABLE_TRUST: u8 = 70;

/// Trust gained per healthy probe.
pub const SUCCESS_REWARD: i64 = 1;

/// Trust lost per degraded probe.
pub const DEGRADED_PENALTY: i64 = 5;

/// Trust lost per unreachable probe or timeout.
pub const UNREACHABLE_PENALTY: i64 = 10;

/// A degraded probe leaving trust below this blacklists the peer.
pub const DEGRADED_BLACKLIST_THRESHOLD: u8 = 20;

/// An unreachable probe leaving trust below this blacklists the peer.
pub const UNREACHABLE_BLACKLIST_THRESHOLD: u8 = 10;

/// Result of folding one probe outcome into a trust score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustUpdate {
    /// New trust score.
    pub trust: TrustScore,
    /// Whether the peer must now be blacklisted.
    pub blacklist: bool,
}

/// Stateless trust computations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustScorer;

impl TrustScorer {
    /// Scores how good a replica holder `peer` would be, in `0..=200`.
    ///
    /// Trust dominates; success rate, bandwidth and uptime add bounded
    /// bonuses; latency subtracts a bounded penalty.
    #[must_use]
    pub fn suitability_score(peer: &Peer, metrics: &PerformanceMetrics) -> f64 {
        let trust = f64::from(peer.trust().value());
        let success = (metrics.success_rate * 0.3).min(30.0);
        let bandwidth = (peer.capabilities.bandwidth_kbps as f64 / 1000.0 * 10.0).min(20.0);
        let uptime = (peer.capabilities.uptime_percent / 100.0 * 15.0).min(15.0);
        let latency = (metrics.latency_ms / 50.0).min(20.0);

        let score = trust + success + bandwidth + uptime - latency;
        if score.is_nan() {
            return 0.0;
        }
        score.clamp(0.0, MAX_SUITABILITY)
    }

    /// Returns true if `peer` is cleared for `required` and trusted enough.
    #[must_use]
    pub fn is_suitable(peer: &Peer, required: Classification) -> bool {
        peer.classification().satisfies(required) && peer.trust().value() >= SUITABLE_TRUST
    }

    /// Applies one probe outcome to `trust`.
    #[must_use]
    pub fn apply_outcome(trust: TrustScore, outcome: &ProbeOutcome) -> TrustUpdate {
        match outcome {
            ProbeOutcome::Healthy { .. } => TrustUpdate {
                trust: trust.adjusted(SUCCESS_REWARD),
                blacklist: false,
            },
            ProbeOutcome::Degraded { .. } => {
                let trust = trust.adjusted(-DEGRADED_PENALTY);
                TrustUpdate {
                    trust,
                    blacklist: trust.value() < DEGRADED_BLACKLIST_THRESHOLD,
                }
            }
            ProbeOutcome::Unreachable => {
                let trust = trust.adjusted(-UNREACHABLE_PENALTY);
                TrustUpdate {
                    trust,
                    blacklist: trust.value() < UNREACHABLE_BLACKLIST_THRESHOLD,
                }
            }
        }
    }
}
