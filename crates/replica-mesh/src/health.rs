//! Periodic peer health probing.
//!
//! Every cycle probes each catalogued, non-blacklisted peer concurrently,
//! waits for every probe to resolve or time out, and then writes the whole
//! cycle back to the catalog at once.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::PeerCatalog;
use crate::peer::PeerId;
use crate::probe::{ProbeOutcome, Prober, probe_with_timeout};
use crate::ticker::{FlightFlag, LoopHandle, Ticker, spawn_periodic};

/// Default time between health cycles.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on concurrent probes within one cycle.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Health monitor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Time between cycles.
    pub interval: Duration,
    /// Timeout applied to each probe independently.
    pub probe_timeout: Duration,
    /// Maximum probes in flight at once.
    pub max_in_flight: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEALTH_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl HealthConfig {
    /// Sets the cycle interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the per-probe timeout.
    #[must_use]
    pub const fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the concurrency cap. Zero is treated as one.
    #[must_use]
    pub const fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

/// Outcome of probing one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthResult {
    /// Probed peer.
    pub peer_id: PeerId,
    /// What the probe saw.
    pub outcome: ProbeOutcome,
    /// Restore generation the probe target was read at.
    pub generation: u64,
}

/// Summary of one health cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Peers probed.
    pub probed: usize,
    /// Healthy responses.
    pub healthy: usize,
    /// Reachable peers that answered with an error.
    pub degraded: usize,
    /// Unreachable peers and timeouts.
    pub unreachable: usize,
    /// Peers this cycle pushed onto the blacklist.
    pub newly_blacklisted: Vec<PeerId>,
}

impl HealthReport {
    fn tally(results: &[HealthResult], newly_blacklisted: Vec<PeerId>) -> Self {
        let mut report = Self {
            probed: results.len(),
            newly_blacklisted,
            ..Self::default()
        };
        for result in results {
            match result.outcome {
                ProbeOutcome::Healthy { .. } => report.healthy += 1,
                ProbeOutcome::Degraded { .. } => report.degraded += 1,
                ProbeOutcome::Unreachable => report.unreachable += 1,
            }
        }
        report
    }
}

/// Probes peers and feeds the results back into the catalog.
pub struct HealthMonitor {
    catalog: Arc<PeerCatalog>,
    prober: Arc<dyn Prober>,
    config: HealthConfig,
    flight: FlightFlag,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Creates a monitor over `catalog` probing through `prober`.
    #[must_use]
    pub fn new(catalog: Arc<PeerCatalog>, prober: Arc<dyn Prober>, config: HealthConfig) -> Self {
        Self {
            catalog,
            prober,
            config,
            flight: FlightFlag::default(),
        }
    }

    /// Returns the monitor's settings.
    #[must_use]
    pub const fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Runs one full health cycle.
    ///
    /// Resolves once every probe has answered or timed out and the results
    /// have been applied to the catalog.
    pub async fn run_cycle(&self) -> HealthReport {
        let targets = self.catalog.probe_targets();
        if targets.is_empty() {
            debug!("No peers to probe");
            return HealthReport::default();
        }

        let timeout = self.config.probe_timeout;
        let prober = self.prober.as_ref();
        let results: Vec<HealthResult> = stream::iter(targets)
            .map(|target| async move {
                let outcome = match &target.address {
                    Some(address) => probe_with_timeout(prober, address, timeout).await,
                    None => {
                        debug!(
                            peer_id = %target.peer_id,
                            "Peer has no address, counting as unreachable"
                        );
                        ProbeOutcome::Unreachable
                    }
                };
                HealthResult {
                    peer_id: target.peer_id,
                    outcome,
                    generation: target.generation,
                }
            })
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect()
            .await;

        let newly_blacklisted = self.catalog.apply_health_results(&results);
        let report = HealthReport::tally(&results, newly_blacklisted);
        info!(
            probed = report.probed,
            healthy = report.healthy,
            degraded = report.degraded,
            unreachable = report.unreachable,
            blacklisted = report.newly_blacklisted.len(),
            "Health cycle complete"
        );
        report
    }

    /// Runs the monitor on `ticker` until the returned handle is stopped.
    pub fn spawn(self: Arc<Self>, ticker: impl Ticker) -> LoopHandle {
        let flight = self.flight.clone();
        spawn_periodic("health", ticker, &flight, move || {
            let monitor = Arc::clone(&self);
            async move {
                monitor.run_cycle().await;
            }
        })
    }
}
