//! Periodic peer discovery from a [`Directory`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{PeerCatalog, UpsertOutcome};
use crate::directory::Directory;
use crate::error::DirectoryError;
use crate::ticker::{FlightFlag, LoopHandle, Ticker, spawn_periodic};

/// Default time between discovery cycles.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);

/// Discovery loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Time between cycles.
    pub interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_DISCOVERY_INTERVAL,
        }
    }
}

impl DiscoveryConfig {
    /// Sets the cycle interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Summary of one discovery cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Descriptors the directory returned.
    pub discovered: usize,
    /// Descriptors that were inserted or refreshed.
    pub upserted: usize,
    /// Malformed descriptors dropped.
    pub rejected: usize,
    /// The directory had nothing to serve this cycle.
    pub directory_unavailable: bool,
}

/// Pulls descriptors from a directory into the catalog.
pub struct DiscoveryLoop {
    catalog: Arc<PeerCatalog>,
    directory: Arc<dyn Directory>,
    config: DiscoveryConfig,
    flight: FlightFlag,
}

impl std::fmt::Debug for DiscoveryLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryLoop")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DiscoveryLoop {
    /// Creates a loop feeding `catalog` from `directory`.
    #[must_use]
    pub fn new(
        catalog: Arc<PeerCatalog>,
        directory: Arc<dyn Directory>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            catalog,
            directory,
            config,
            flight: FlightFlag::default(),
        }
    }

    /// Returns the loop's settings.
    #[must_use]
    pub const fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Runs one discovery cycle.
    ///
    /// Directory failures end the cycle quietly; malformed descriptors are
    /// skipped one by one.
    pub async fn run_cycle(&self) -> DiscoveryReport {
        let descriptors = match self.directory.list_peers().await {
            Ok(descriptors) => descriptors,
            Err(DirectoryError::Unavailable) => {
                debug!("Directory unavailable, skipping discovery cycle");
                return DiscoveryReport {
                    directory_unavailable: true,
                    ..DiscoveryReport::default()
                };
            }
            Err(DirectoryError::Transport(reason)) => {
                debug!(error = %reason, "Directory unreachable, skipping discovery cycle");
                return DiscoveryReport {
                    directory_unavailable: true,
                    ..DiscoveryReport::default()
                };
            }
        };

        let mut report = DiscoveryReport {
            discovered: descriptors.len(),
            ..DiscoveryReport::default()
        };
        for descriptor in descriptors {
            match self.catalog.upsert_descriptor(descriptor) {
                Ok(UpsertOutcome::Inserted | UpsertOutcome::Updated) => report.upserted += 1,
                Ok(UpsertOutcome::Unchanged | UpsertOutcome::IgnoredLocal) => {}
                Err(_) => report.rejected += 1,
            }
        }

        info!(
            discovered = report.discovered,
            upserted = report.upserted,
            rejected = report.rejected,
            "Discovery cycle complete"
        );
        report
    }

    /// Runs discovery on `ticker` until the returned handle is stopped.
    pub fn spawn(self: Arc<Self>, ticker: impl Ticker) -> LoopHandle {
        let flight = self.flight.clone();
        spawn_periodic("discovery", ticker, &flight, move || {
            let discovery = Arc::clone(&self);
            async move {
                discovery.run_cycle().await;
            }
        })
    }
}
